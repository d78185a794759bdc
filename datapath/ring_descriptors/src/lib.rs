//! Hardware descriptor formats used by the transmit and receive rings.
//!
//! A descriptor is a fixed-size record shared with the device: software
//! writes the buffer address, length, and command bits, and hardware writes
//! back completion status. The formats here must be honored byte-for-byte,
//! so every field is accessed through [`Volatile`] reads and writes and
//! multi-bit write-back fields are decoded with explicit shift/mask
//! accessors rather than bitfield layout tricks.

#![cfg_attr(not(test), no_std)]

#[macro_use] extern crate static_assertions;
extern crate bitflags;
extern crate volatile;
extern crate bit_field;
extern crate dma_region;

use core::fmt;
use bit_field::BitField;
use bitflags::bitflags;
use volatile::Volatile;
use dma_region::PhysicalAddress;

bitflags! {
    /// Per-queue transmit capabilities, supplied once at queue setup and
    /// applied to every descriptor the queue writes.
    ///
    /// One generic fill path parameterized by this set replaces the
    /// per-combination specialized transmit functions the flags would
    /// otherwise multiply into.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct TxFeatures: u8 {
        /// Ask hardware to insert the L4 checksum into outgoing packets.
        const INSERT_CHECKSUM = 1 << 0;
        /// Tag outgoing packets with the queue's VLAN.
        const VLAN_ENABLE = 1 << 1;
    }
}

/// Functionality that all transmit descriptors must support.
///
/// Ownership rule: once [`send`](Self::send) has been called on a slot and
/// the batch has been published to hardware, software must not touch the
/// address or length fields again until [`descriptor_done`](Self::descriptor_done)
/// reports true.
pub trait TxDescriptor {
    /// Clears all of the descriptor's fields.
    fn init(&mut self);

    /// Fills the descriptor to transmit one buffer.
    ///
    /// # Arguments
    /// * `buffer_addr`: starting physical address of the packet buffer.
    /// * `buffer_length`: length of the packet in bytes.
    /// * `features`: the queue's offload capabilities, encoded into the
    ///   command word.
    /// * `end_of_packet`: whether this buffer is the last one of its frame;
    ///   false for all but the final segment of a chained frame.
    fn send(
        &mut self,
        buffer_addr: PhysicalAddress,
        buffer_length: u16,
        features: TxFeatures,
        end_of_packet: bool,
    );

    /// Asks hardware to write back completion status once this descriptor
    /// (and by implication every earlier one in the batch) has been sent.
    fn request_report(&mut self);

    /// Returns true once hardware has reported this descriptor complete.
    fn descriptor_done(&self) -> bool;

    /// Performs the hardware side of completion: sets the done status bit.
    /// Only simulated devices and tests call this.
    fn write_back_done(&mut self);
}

/// Functionality that all receive descriptors must support.
pub trait RxDescriptor {
    /// Initializes the descriptor: clears its status and points it at a
    /// receive buffer.
    fn init(&mut self, buffer_addr: PhysicalAddress);

    /// Re-arms the descriptor with a fresh receive buffer.
    fn set_packet_address(&mut self, buffer_addr: PhysicalAddress);

    /// Clears the status bits so hardware can reuse the descriptor.
    fn reset_status(&mut self);

    /// Returns true if hardware has filled this descriptor's buffer.
    fn descriptor_done(&self) -> bool;

    /// Returns true if this descriptor's buffer is the last one of a frame.
    fn end_of_packet(&self) -> bool;

    /// The number of bytes hardware wrote into the buffer.
    fn length(&self) -> u16;

    /// Performs the hardware side of packet reception: records the received
    /// length and status. Only simulated devices and tests call this.
    fn write_back(&mut self, length: u16, end_of_packet: bool);
}

// Transmit command bits
/// Tx command: end of packet
pub const TX_CMD_EOP: u8 = 1 << 0;
/// Tx command: insert checksum
pub const TX_CMD_INSERT_CHECKSUM: u8 = 1 << 2;
/// Tx command: report status when the descriptor completes
pub const TX_CMD_REPORT_STATUS: u8 = 1 << 3;
/// Tx command: VLAN packet enable
pub const TX_CMD_VLAN_ENABLE: u8 = 1 << 6;
/// Tx status: descriptor done
pub const TX_STATUS_DD: u8 = 1 << 0;

/// A 16-byte transmit descriptor with a report-on-completion command bit.
///
/// There is one instance of this struct per ring slot; it is only ever
/// created by overlaying zeroed DMA memory.
#[repr(C)]
pub struct ReportTxDescriptor {
    /// The starting physical address of the packet buffer
    pub buffer_addr: Volatile<u64>,
    /// Length of the packet in bytes
    pub length: Volatile<u16>,
    /// Command bits
    pub cmd: Volatile<u8>,
    /// Status bits, written back by hardware
    pub status: Volatile<u8>,
    /// Unused tail of the descriptor line
    pub reserved: Volatile<u32>,
}

const_assert_eq!(core::mem::size_of::<ReportTxDescriptor>(), 16);

impl TxDescriptor for ReportTxDescriptor {
    fn init(&mut self) {
        self.buffer_addr.write(0);
        self.length.write(0);
        self.cmd.write(0);
        self.status.write(0);
        self.reserved.write(0);
    }

    fn send(
        &mut self,
        buffer_addr: PhysicalAddress,
        buffer_length: u16,
        features: TxFeatures,
        end_of_packet: bool,
    ) {
        let mut cmd = 0u8;
        if end_of_packet {
            cmd |= TX_CMD_EOP;
        }
        if features.contains(TxFeatures::INSERT_CHECKSUM) {
            cmd |= TX_CMD_INSERT_CHECKSUM;
        }
        if features.contains(TxFeatures::VLAN_ENABLE) {
            cmd |= TX_CMD_VLAN_ENABLE;
        }
        self.buffer_addr.write(buffer_addr.value() as u64);
        self.length.write(buffer_length);
        self.cmd.write(cmd);
        self.status.write(0);
    }

    fn request_report(&mut self) {
        let cmd = self.cmd.read();
        self.cmd.write(cmd | TX_CMD_REPORT_STATUS);
    }

    fn descriptor_done(&self) -> bool {
        (self.status.read() & TX_STATUS_DD) == TX_STATUS_DD
    }

    fn write_back_done(&mut self) {
        self.status.write(TX_STATUS_DD);
    }
}

impl fmt::Debug for ReportTxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{addr: {:#X}, length: {}, cmd: {:#X}, status: {:#X}}}",
            self.buffer_addr.read(), self.length.read(), self.cmd.read(), self.status.read())
    }
}

// Bit positions within the receive write-back word. The word is owned by
// hardware from descriptor publication until the done bit is observed.
const RX_WB_DD_BIT: usize = 0;
const RX_WB_EOP_BIT: usize = 1;
const RX_WB_PKT_LEN_RANGE: core::ops::Range<usize> = 32..48;

/// A 16-byte receive descriptor: a buffer address word the driver writes and
/// a write-back word the hardware fills on reception.
#[repr(C)]
pub struct WriteBackRxDescriptor {
    /// The starting physical address of the receive buffer
    pub buffer_addr: Volatile<u64>,
    /// Status and packet length, written back by hardware
    pub write_back: Volatile<u64>,
}

const_assert_eq!(core::mem::size_of::<WriteBackRxDescriptor>(), 16);

impl RxDescriptor for WriteBackRxDescriptor {
    fn init(&mut self, buffer_addr: PhysicalAddress) {
        self.buffer_addr.write(buffer_addr.value() as u64);
        self.write_back.write(0);
    }

    fn set_packet_address(&mut self, buffer_addr: PhysicalAddress) {
        self.buffer_addr.write(buffer_addr.value() as u64);
    }

    fn reset_status(&mut self) {
        self.write_back.write(0);
    }

    fn descriptor_done(&self) -> bool {
        self.write_back.read().get_bit(RX_WB_DD_BIT)
    }

    fn end_of_packet(&self) -> bool {
        self.write_back.read().get_bit(RX_WB_EOP_BIT)
    }

    fn length(&self) -> u16 {
        self.write_back.read().get_bits(RX_WB_PKT_LEN_RANGE) as u16
    }

    fn write_back(&mut self, length: u16, end_of_packet: bool) {
        let mut word = 0u64;
        word.set_bit(RX_WB_DD_BIT, true);
        word.set_bit(RX_WB_EOP_BIT, end_of_packet);
        word.set_bits(RX_WB_PKT_LEN_RANGE, length as u64);
        self.write_back.write(word);
    }
}

impl fmt::Debug for WriteBackRxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{addr: {:#X}, write_back: {:#X}}}",
            self.buffer_addr.read(), self.write_back.read())
    }
}

#[cfg(test)]
mod test;
