extern crate std;

use super::*;

fn zeroed<T>() -> T {
    // Descriptors are only ever materialized over zeroed DMA memory; tests
    // reproduce that starting state directly.
    unsafe { core::mem::zeroed() }
}

#[test]
fn tx_send_fills_fields_and_clears_status() {
    let mut desc: ReportTxDescriptor = zeroed();
    desc.status.write(TX_STATUS_DD); // stale completion from a previous use
    desc.send(PhysicalAddress::new(0x1000), 64, TxFeatures::empty(), true);
    assert_eq!(desc.buffer_addr.read(), 0x1000);
    assert_eq!(desc.length.read(), 64);
    assert_eq!(desc.cmd.read(), TX_CMD_EOP);
    assert!(!desc.descriptor_done());
}

#[test]
fn tx_features_encode_into_the_command_word() {
    let mut desc: ReportTxDescriptor = zeroed();
    desc.send(
        PhysicalAddress::new(0x1000),
        64,
        TxFeatures::INSERT_CHECKSUM | TxFeatures::VLAN_ENABLE,
        true,
    );
    assert_eq!(
        desc.cmd.read(),
        TX_CMD_EOP | TX_CMD_INSERT_CHECKSUM | TX_CMD_VLAN_ENABLE
    );
}

#[test]
fn tx_mid_frame_segment_has_no_end_of_packet() {
    let mut desc: ReportTxDescriptor = zeroed();
    desc.send(PhysicalAddress::new(0x1000), 64, TxFeatures::empty(), false);
    assert_eq!(desc.cmd.read() & TX_CMD_EOP, 0);
}

#[test]
fn tx_report_request_preserves_other_command_bits() {
    let mut desc: ReportTxDescriptor = zeroed();
    desc.send(PhysicalAddress::new(0x2000), 128, TxFeatures::INSERT_CHECKSUM, true);
    desc.request_report();
    assert_eq!(
        desc.cmd.read(),
        TX_CMD_EOP | TX_CMD_INSERT_CHECKSUM | TX_CMD_REPORT_STATUS
    );
}

#[test]
fn tx_done_round_trip() {
    let mut desc: ReportTxDescriptor = zeroed();
    desc.send(PhysicalAddress::new(0x3000), 60, TxFeatures::empty(), true);
    assert!(!desc.descriptor_done());
    desc.write_back_done();
    assert!(desc.descriptor_done());
    desc.init();
    assert!(!desc.descriptor_done());
    assert_eq!(desc.buffer_addr.read(), 0);
}

#[test]
fn rx_write_back_decodes_length_and_eop() {
    let mut desc: WriteBackRxDescriptor = zeroed();
    desc.init(PhysicalAddress::new(0x4000));
    assert!(!desc.descriptor_done());

    desc.write_back(1514, true);
    assert!(desc.descriptor_done());
    assert!(desc.end_of_packet());
    assert_eq!(desc.length(), 1514);

    desc.reset_status();
    assert!(!desc.descriptor_done());
    assert_eq!(desc.length(), 0);
    // the buffer address word is untouched by status writes
    assert_eq!(desc.buffer_addr.read(), 0x4000);
}

#[test]
fn rx_length_field_is_masked_to_its_range() {
    let mut desc: WriteBackRxDescriptor = zeroed();
    desc.init(PhysicalAddress::new(0x5000));
    desc.write_back(u16::MAX, false);
    assert_eq!(desc.length(), u16::MAX);
    assert!(!desc.end_of_packet());
    assert!(desc.descriptor_done());
}
