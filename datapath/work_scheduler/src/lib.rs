//! The hardware work-scheduler datapath: the get-work/add-work specialization
//! of the ring-engine pattern.
//!
//! A [`Workslot`] is one core's window onto the scheduler. Fetching work is
//! the single blocking operation in the whole datapath: a bounded spin on the
//! hardware pending bit, returning empty on tick exhaustion, which is the
//! ordinary result under low load. Everything else is a register write whose
//! scheduling consequences happen inside the device.
//!
//! Flow contracts the hardware relies on (and software cannot police without
//! defeating the design): an atomic-tagged item is held by at most one
//! workslot at a time, and ordered-tagged items of one flow must be released
//! or forwarded in the order they were fetched. Violating the ordered
//! contract reorders the flow downstream; it is undefined behavior at the
//! device level, not a detectable error here.

#![cfg_attr(not(test), no_std)]

#[macro_use] extern crate log;
extern crate bit_field;

use core::fmt;
use core::sync::atomic::{fence, Ordering};
use bit_field::BitField;

// Layout of the workslot tag word. Group and type share the word with the
// tag value so one load describes the whole scheduling state.
const TAG_VALUE_RANGE: core::ops::Range<usize> = 0..32;
const TAG_TYPE_RANGE: core::ops::Range<usize> = 32..34;
const TAG_GROUP_RANGE: core::ops::Range<usize> = 36..46;
/// Set while a software tag switch is still resolving in the device.
pub const TAG_SWITCH_PENDING_BIT: usize = 62;
/// Set while a triggered fetch has not yet produced a result.
pub const TAG_FETCH_PENDING_BIT: usize = 63;

/// The tag-type encoding hardware uses for "no work".
pub const TAG_TYPE_EMPTY: u64 = 3;

/// How a work item's tag schedules it relative to its flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedType {
    /// Items of one flow may be processed concurrently but must complete in
    /// arrival order.
    Ordered = 0,
    /// At most one workslot processes a given flow at a time.
    Atomic = 1,
    /// No ordering or exclusivity guarantee.
    Untagged = 2,
}

impl SchedType {
    pub fn bits(&self) -> u64 {
        *self as u64
    }

    pub fn from_bits(bits: u64) -> Option<SchedType> {
        match bits {
            0 => Some(SchedType::Ordered),
            1 => Some(SchedType::Atomic),
            2 => Some(SchedType::Untagged),
            _ => None,
        }
    }
}

/// One schedulable unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// The flow-identifying key.
    pub tag: u32,
    pub sched_type: SchedType,
    /// The hardware queue (group) the item belongs to.
    pub queue_id: u16,
    /// Opaque reference to the work itself, typically a buffer address.
    pub payload: u64,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "work {{ tag: {:#X}, type: {:?}, queue: {} }}",
            self.tag, self.sched_type, self.queue_id)
    }
}

/// What a worker wants the scheduler to do with an event it is enqueuing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOp {
    /// Admit a newly-created item.
    New(WorkItem),
    /// Pass the currently-held item onward as this one.
    Forward(WorkItem),
    /// Complete the currently-held item's tag.
    Release,
}

/// Packs an item's scheduling state into a tag word, the way the device
/// composes one at delivery. Register-seam implementations that model the
/// scheduler in software build their tag words with this.
pub fn encode_tag_word(tag: u32, type_bits: u64, group: u16) -> u64 {
    let mut word = 0u64;
    word.set_bits(TAG_VALUE_RANGE, u64::from(tag));
    word.set_bits(TAG_TYPE_RANGE, type_bits);
    word.set_bits(TAG_GROUP_RANGE, u64::from(group));
    word
}

/// The workslot register seam: the operations one scheduler port exposes.
///
/// Reads are plain loads of device-maintained words; writes are posted
/// stores whose effects resolve inside the device. None of them block.
pub trait SchedulerRegs {
    /// Asks the device to deliver the next schedulable item to this slot.
    /// With `wait_for_work` the fetch stays pending until work exists;
    /// without it, an empty scheduler yields an empty tag word immediately.
    fn trigger_fetch(&mut self, wait_for_work: bool);

    /// The slot's tag word: current tag, type, and group, plus the fetch
    /// and tag-switch pending bits.
    fn tag_word(&self) -> u64;

    /// The payload word accompanying the most recent delivery.
    fn work_word(&self) -> u64;

    /// Enqueues a new item into `group`.
    fn add_work(&mut self, group: u16, tag: u32, sched_type: SchedType, payload: u64);

    /// Switches the current item's tag in place, staying in its group.
    fn swtag_norm(&mut self, tag: u32, sched_type: SchedType);

    /// Drops the current item's tag, making it untagged.
    fn swtag_untag(&mut self);

    /// Completes the current tag: releases the flow so the scheduler may
    /// hand its next item to another workslot.
    fn swtag_flush(&mut self);

    /// Deschedules the current item and re-enqueues it (with a new tag)
    /// into `group`; used when the item changes queues.
    fn swtag_desched(&mut self, tag: u32, sched_type: SchedType, group: u16);

    /// Stages the payload that travels with the next deschedule re-add.
    fn update_group_payload(&mut self, payload: u64);

    /// Items currently admitted into the scheduler.
    fn in_flight(&self) -> u64;

    /// The admission limit beyond which new work must be refused.
    fn admission_limit(&self) -> u64;
}

/// One core's workslot on the scheduler.
pub struct Workslot<S: SchedulerRegs> {
    pub(crate) regs: S,
    /// A same-group forward left a tag switch resolving; it must complete
    /// before the next fetch.
    swtag_pending: bool,
}

impl<S: SchedulerRegs> Workslot<S> {
    pub fn new(regs: S) -> Workslot<S> {
        Workslot { regs, swtag_pending: false }
    }

    /// Fetches the next work item, spinning on the pending bit for at most
    /// `timeout_ticks` polls.
    ///
    /// Returns `None` when the budget expires or the scheduler reports
    /// empty; both are ordinary outcomes, not errors.
    pub fn get_work(&mut self, timeout_ticks: u64) -> Option<WorkItem> {
        self.wait_tag_switch();
        self.regs.trigger_fetch(true);

        let mut ticks: u64 = 0;
        let mut word = self.regs.tag_word();
        while word.get_bit(TAG_FETCH_PENDING_BIT) {
            if ticks >= timeout_ticks {
                return None;
            }
            core::hint::spin_loop();
            ticks += 1;
            word = self.regs.tag_word();
        }

        self.decode_delivery(word)
    }

    /// Decodes a completed fetch's tag word into the delivered item, or
    /// `None` for the empty tag type.
    fn decode_delivery(&self, word: u64) -> Option<WorkItem> {
        let sched_type = SchedType::from_bits(word.get_bits(TAG_TYPE_RANGE))?;
        Some(WorkItem {
            tag: word.get_bits(TAG_VALUE_RANGE) as u32,
            sched_type,
            queue_id: word.get_bits(TAG_GROUP_RANGE) as u16,
            payload: self.regs.work_word(),
        })
    }

    /// Admits a newly-created item into the scheduler.
    ///
    /// Returns false when the scheduler is at its admission limit. Unlike a
    /// short transmit burst, refused work cannot simply be retried from a
    /// buffer the caller still holds cheaply, so backpressure is explicit
    /// rather than silent.
    pub fn new_event(&mut self, item: &WorkItem) -> bool {
        fence(Ordering::AcqRel);
        if self.regs.admission_limit() <= self.regs.in_flight() {
            return false;
        }
        self.regs.add_work(item.queue_id, item.tag, item.sched_type, item.payload);
        true
    }

    /// Forwards the currently-held item onward as `item`.
    ///
    /// Staying in the same queue is an in-place tag rewrite; moving to a
    /// different queue requires descheduling and re-adding, since queue
    /// membership cannot change in place. Callers that change queues on
    /// every forward pay the slow path every time.
    pub fn forward(&mut self, item: &WorkItem) {
        let current = self.regs.tag_word();
        let current_group = current.get_bits(TAG_GROUP_RANGE) as u16;
        if current_group == item.queue_id {
            // Only an actual tag-switch write leaves a switch resolving;
            // the untagged-to-untagged case issues nothing, and waiting on
            // it would stall the next fetch on a bit no operation set.
            if self.forward_same_group(item, current) {
                self.swtag_pending = true;
            }
        } else {
            self.regs.update_group_payload(item.payload);
            self.regs.swtag_desched(item.tag, item.sched_type, item.queue_id);
        }
    }

    // Tag-rewrite matrix for a same-group forward; returns whether a tag
    // switch was issued:
    //
    //   current \ new    Ordered   Atomic   Untagged
    //   Ordered          norm      norm     untag
    //   Atomic           norm      norm     untag
    //   Untagged         norm      norm     (no-op)
    fn forward_same_group(&mut self, item: &WorkItem, current_word: u64) -> bool {
        match item.sched_type {
            SchedType::Untagged => {
                if current_word.get_bits(TAG_TYPE_RANGE) != SchedType::Untagged.bits() {
                    self.regs.swtag_untag();
                    true
                } else {
                    false
                }
            }
            _ => {
                self.regs.swtag_norm(item.tag, item.sched_type);
                true
            }
        }
    }

    /// Releases the currently-held item's tag, letting the scheduler admit
    /// the flow's next item (required for atomic and ordered flows to make
    /// progress past this slot).
    pub fn release(&mut self) {
        self.regs.swtag_flush();
        self.swtag_pending = false;
    }

    /// Dispatches one enqueue operation. Returns false only when a `New`
    /// event is refused by admission control; forwards and releases always
    /// succeed.
    pub fn enqueue(&mut self, op: &EventOp) -> bool {
        match op {
            EventOp::New(item) => self.new_event(item),
            EventOp::Forward(item) => {
                self.forward(item);
                true
            }
            EventOp::Release => {
                self.release();
                true
            }
        }
    }

    /// Admits a burst of newly-created items, stopping at the first
    /// admission refusal. Returns how many were accepted; callers retry or
    /// drop the rest.
    pub fn enqueue_new_burst(&mut self, items: &[WorkItem]) -> usize {
        let mut accepted = 0;
        for item in items {
            if !self.new_event(item) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Teardown helper: pulls and flushes whatever the scheduler can deliver
    /// immediately, returning how many items were drained.
    ///
    /// Unlike [`get_work`](Self::get_work), the fetches here are
    /// non-waiting: an empty scheduler reports back right away instead of
    /// leaving a waiting fetch outstanding on a slot that is being torn
    /// down.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            self.wait_tag_switch();
            self.regs.trigger_fetch(false);
            let mut word = self.regs.tag_word();
            while word.get_bit(TAG_FETCH_PENDING_BIT) {
                core::hint::spin_loop();
                word = self.regs.tag_word();
            }
            let item = match self.decode_delivery(word) {
                Some(item) => item,
                None => break,
            };
            trace!("workslot drain: flushing {}", item);
            self.regs.swtag_flush();
            drained += 1;
        }
        self.swtag_pending = false;
        drained
    }

    /// Completes any outstanding tag switch before the next fetch; the
    /// device guarantees switches resolve, so this wait is short and
    /// unconditional.
    fn wait_tag_switch(&mut self) {
        if !self.swtag_pending {
            return;
        }
        while self.regs.tag_word().get_bit(TAG_SWITCH_PENDING_BIT) {
            core::hint::spin_loop();
        }
        self.swtag_pending = false;
    }
}

#[cfg(test)]
mod test;
