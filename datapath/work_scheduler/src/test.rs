extern crate std;

use self::std::collections::{BTreeSet, VecDeque};
use self::std::rc::Rc;
use self::std::vec::Vec;
use core::cell::{Cell, RefCell};
use bit_field::BitField;

use super::*;

#[derive(Clone, Copy)]
struct Pending {
    tag: u32,
    type_bits: u64,
    group: u16,
    payload: u64,
}

/// Software model of the scheduler device, shared by every port attached to
/// it. It implements just enough of the scheduling discipline to exercise
/// the workslot contracts: per-queue FIFO delivery, atomic-flow exclusivity,
/// and the admission limit.
struct SoftScheduler {
    queues: Vec<VecDeque<Pending>>,
    /// atomic flows currently held by some workslot
    held: BTreeSet<(u16, u32)>,
    in_flight: u64,
    limit: u64,
}

type SharedScheduler = Rc<RefCell<SoftScheduler>>;

fn soft_scheduler(num_queues: usize, limit: u64) -> SharedScheduler {
    Rc::new(RefCell::new(SoftScheduler {
        queues: (0..num_queues).map(|_| VecDeque::new()).collect(),
        held: BTreeSet::new(),
        in_flight: 0,
        limit,
    }))
}

fn occupancy(sched: &SharedScheduler, group: u16) -> usize {
    sched.borrow().queues[usize::from(group)].len()
}

fn empty_word() -> u64 {
    let mut word = 0u64;
    word.set_bits(32..34, TAG_TYPE_EMPTY);
    word
}

/// One simulated workslot port into the soft scheduler.
struct SoftPort {
    sched: SharedScheduler,
    tag_word: Cell<u64>,
    work_word: Cell<u64>,
    wait_for_work: Cell<bool>,
    staged_payload: Cell<u64>,
    ops: RefCell<Vec<&'static str>>,
}

impl SoftPort {
    fn new(sched: &SharedScheduler) -> SoftPort {
        SoftPort {
            sched: sched.clone(),
            tag_word: Cell::new(empty_word()),
            work_word: Cell::new(0),
            wait_for_work: Cell::new(false),
            staged_payload: Cell::new(0),
            ops: RefCell::new(Vec::new()),
        }
    }

    fn op(&self, name: &'static str) {
        self.ops.borrow_mut().push(name);
    }

    /// (group, tag, type_bits) currently held by this slot.
    fn current(&self) -> (u16, u32, u64) {
        let word = self.tag_word.get();
        (
            word.get_bits(36..46) as u16,
            word.get_bits(0..32) as u32,
            word.get_bits(32..34),
        )
    }

    fn unlock_current(&self) {
        let (group, tag, type_bits) = self.current();
        if type_bits == SchedType::Atomic.bits() {
            self.sched.borrow_mut().held.remove(&(group, tag));
        }
    }

    /// Attempts to complete a pending fetch by delivering schedulable work.
    fn resolve(&self) {
        if !self.tag_word.get().get_bit(TAG_FETCH_PENDING_BIT) {
            return;
        }
        let mut sched = self.sched.borrow_mut();
        let mut found = None;
        'queues: for (g, queue) in sched.queues.iter().enumerate() {
            for (i, item) in queue.iter().enumerate() {
                let blocked = item.type_bits == SchedType::Atomic.bits()
                    && sched.held.contains(&(item.group, item.tag));
                if !blocked {
                    found = Some((g, i));
                    break 'queues;
                }
            }
        }
        match found {
            Some((g, i)) => {
                let item = sched.queues[g].remove(i).unwrap();
                if item.type_bits == SchedType::Atomic.bits() {
                    sched.held.insert((item.group, item.tag));
                }
                self.tag_word.set(encode_tag_word(item.tag, item.type_bits, item.group));
                self.work_word.set(item.payload);
            }
            None => {
                // in wait mode the fetch simply stays pending
                if !self.wait_for_work.get() {
                    self.tag_word.set(empty_word());
                }
            }
        }
    }
}

impl SchedulerRegs for SoftPort {
    fn trigger_fetch(&mut self, wait_for_work: bool) {
        self.wait_for_work.set(wait_for_work);
        let mut word = self.tag_word.get();
        word.set_bit(TAG_FETCH_PENDING_BIT, true);
        self.tag_word.set(word);
        self.resolve();
    }

    fn tag_word(&self) -> u64 {
        self.resolve(); // work may have arrived since the fetch was triggered
        let word = self.tag_word.get();
        if word.get_bit(TAG_SWITCH_PENDING_BIT) {
            // switches resolve after one poll of latency
            let mut cleared = word;
            cleared.set_bit(TAG_SWITCH_PENDING_BIT, false);
            self.tag_word.set(cleared);
        }
        word
    }

    fn work_word(&self) -> u64 {
        self.work_word.get()
    }

    fn add_work(&mut self, group: u16, tag: u32, sched_type: SchedType, payload: u64) {
        self.op("add_work");
        let mut sched = self.sched.borrow_mut();
        sched.queues[usize::from(group)].push_back(Pending {
            tag,
            type_bits: sched_type.bits(),
            group,
            payload,
        });
        sched.in_flight += 1;
    }

    fn swtag_norm(&mut self, tag: u32, sched_type: SchedType) {
        self.op("swtag_norm");
        self.unlock_current();
        let (group, _, _) = self.current();
        if sched_type == SchedType::Atomic {
            self.sched.borrow_mut().held.insert((group, tag));
        }
        let mut word = encode_tag_word(tag, sched_type.bits(), group);
        word.set_bit(TAG_SWITCH_PENDING_BIT, true);
        self.tag_word.set(word);
    }

    fn swtag_untag(&mut self) {
        self.op("swtag_untag");
        self.unlock_current();
        let (group, tag, _) = self.current();
        let mut word = encode_tag_word(tag, SchedType::Untagged.bits(), group);
        word.set_bit(TAG_SWITCH_PENDING_BIT, true);
        self.tag_word.set(word);
    }

    fn swtag_flush(&mut self) {
        self.op("swtag_flush");
        let (_, _, type_bits) = self.current();
        self.unlock_current();
        if type_bits != TAG_TYPE_EMPTY {
            let mut sched = self.sched.borrow_mut();
            sched.in_flight = sched.in_flight.saturating_sub(1);
        }
        self.tag_word.set(empty_word());
    }

    fn swtag_desched(&mut self, tag: u32, sched_type: SchedType, group: u16) {
        self.op("swtag_desched");
        self.unlock_current();
        let payload = self.staged_payload.get();
        self.sched.borrow_mut().queues[usize::from(group)].push_back(Pending {
            tag,
            type_bits: sched_type.bits(),
            group,
            payload,
        });
        self.tag_word.set(empty_word());
    }

    fn update_group_payload(&mut self, payload: u64) {
        self.op("update_group_payload");
        self.staged_payload.set(payload);
    }

    fn in_flight(&self) -> u64 {
        self.sched.borrow().in_flight
    }

    fn admission_limit(&self) -> u64 {
        self.sched.borrow().limit
    }
}

fn workslot(sched: &SharedScheduler) -> Workslot<SoftPort> {
    Workslot::new(SoftPort::new(sched))
}

fn ops_of(slot: &Workslot<SoftPort>) -> Vec<&'static str> {
    slot.regs.ops.borrow().clone()
}

// ---------------------------------------------------------------------------

#[test]
fn get_work_delivers_and_empty_polls() {
    let sched = soft_scheduler(2, 64);
    let mut slot = workslot(&sched);

    // nothing pending: the poll budget expires and that's an ordinary result
    assert_eq!(slot.get_work(8), None);

    let item = WorkItem { tag: 0x42, sched_type: SchedType::Ordered, queue_id: 1, payload: 0xABCD };
    assert!(slot.new_event(&item));
    assert_eq!(occupancy(&sched, 1), 1);

    let got = slot.get_work(8).unwrap();
    assert_eq!(got, item);
    assert_eq!(occupancy(&sched, 1), 0);
    slot.release();
    assert_eq!(sched.borrow().in_flight, 0);
}

#[test]
fn atomic_tag_is_exclusive_to_one_workslot() {
    let sched = soft_scheduler(1, 64);
    let mut worker_a = workslot(&sched);
    let mut worker_b = workslot(&sched);

    let item = WorkItem { tag: 0xF, sched_type: SchedType::Atomic, queue_id: 0, payload: 1 };
    assert!(worker_a.new_event(&item));

    // exactly one worker receives the single pending item
    let got_a = worker_a.get_work(8);
    let got_b = worker_b.get_work(8);
    assert!(got_a.is_some());
    assert!(got_b.is_none());
}

#[test]
fn atomic_flow_admits_the_next_item_only_after_release() {
    let sched = soft_scheduler(1, 64);
    let mut worker_a = workslot(&sched);
    let mut worker_b = workslot(&sched);

    let first = WorkItem { tag: 0xF, sched_type: SchedType::Atomic, queue_id: 0, payload: 1 };
    let second = WorkItem { tag: 0xF, sched_type: SchedType::Atomic, queue_id: 0, payload: 2 };
    assert!(worker_a.new_event(&first));
    assert!(worker_a.new_event(&second));

    assert_eq!(worker_a.get_work(8).unwrap().payload, 1);
    // the flow is held by A, so B spins out its budget empty-handed
    assert_eq!(worker_b.get_work(8), None);

    worker_a.release();
    assert_eq!(worker_b.get_work(8).unwrap().payload, 2);
}

#[test]
fn different_atomic_flows_run_concurrently() {
    let sched = soft_scheduler(1, 64);
    let mut worker_a = workslot(&sched);
    let mut worker_b = workslot(&sched);

    let flow_1 = WorkItem { tag: 0x1, sched_type: SchedType::Atomic, queue_id: 0, payload: 1 };
    let flow_2 = WorkItem { tag: 0x2, sched_type: SchedType::Atomic, queue_id: 0, payload: 2 };
    assert!(worker_a.new_event(&flow_1));
    assert!(worker_a.new_event(&flow_2));

    assert_eq!(worker_a.get_work(8).unwrap().tag, 0x1);
    // a different flow is schedulable even while the first is held
    assert_eq!(worker_b.get_work(8).unwrap().tag, 0x2);
}

#[test]
fn ordered_items_are_fetched_in_arrival_order() {
    let sched = soft_scheduler(1, 64);
    let mut slot = workslot(&sched);

    for payload in 1..=3u64 {
        let item = WorkItem { tag: 0x7, sched_type: SchedType::Ordered, queue_id: 0, payload };
        assert!(slot.new_event(&item));
    }
    for expected in 1..=3u64 {
        let got = slot.get_work(8).unwrap();
        assert_eq!(got.payload, expected);
        slot.release();
    }
}

#[test]
fn same_queue_forward_is_an_in_place_tag_rewrite() {
    let sched = soft_scheduler(2, 64);
    let mut slot = workslot(&sched);

    let item = WorkItem { tag: 0x10, sched_type: SchedType::Atomic, queue_id: 0, payload: 9 };
    assert!(slot.new_event(&item));
    let got = slot.get_work(8).unwrap();
    assert_eq!(occupancy(&sched, 0), 0);

    // forward within the same queue under a new tag
    let forwarded = WorkItem { tag: 0x11, sched_type: SchedType::Atomic, ..got };
    slot.forward(&forwarded);

    // no queue occupancy changed anywhere: the rewrite happened in place
    assert_eq!(occupancy(&sched, 0), 0);
    assert_eq!(occupancy(&sched, 1), 0);
    let ops = ops_of(&slot);
    assert!(ops.contains(&"swtag_norm"));
    assert!(!ops.contains(&"swtag_desched"));

    // the next fetch first waits out the tag switch, then proceeds
    assert_eq!(slot.get_work(4), None);
    slot.release();
}

#[test]
fn forward_to_untagged_uses_untag_and_is_noop_when_already_untagged() {
    let sched = soft_scheduler(1, 64);
    let mut slot = workslot(&sched);

    let item = WorkItem { tag: 0x20, sched_type: SchedType::Atomic, queue_id: 0, payload: 5 };
    assert!(slot.new_event(&item));
    let got = slot.get_work(8).unwrap();

    let dropped = WorkItem { sched_type: SchedType::Untagged, ..got };
    slot.forward(&dropped);
    assert!(ops_of(&slot).contains(&"swtag_untag"));

    // already untagged: forwarding to untagged again issues nothing
    let before = ops_of(&slot).len();
    slot.forward(&dropped);
    assert_eq!(ops_of(&slot).len(), before);

    // and the next fetch proceeds without waiting on a tag switch the
    // no-op forward never issued
    assert_eq!(slot.get_work(4), None);
}

#[test]
fn cross_queue_forward_moves_exactly_one_item() {
    let sched = soft_scheduler(2, 64);
    let mut slot = workslot(&sched);
    let mut downstream = workslot(&sched);

    let item = WorkItem { tag: 0x30, sched_type: SchedType::Ordered, queue_id: 0, payload: 77 };
    assert!(slot.new_event(&item));
    assert_eq!(occupancy(&sched, 0), 1);
    assert_eq!(occupancy(&sched, 1), 0);

    let got = slot.get_work(8).unwrap();
    let moved = WorkItem { queue_id: 1, ..got };
    slot.forward(&moved);

    // the item left queue 0 and arrived in queue 1, exactly once
    assert_eq!(occupancy(&sched, 0), 0);
    assert_eq!(occupancy(&sched, 1), 1);
    assert!(ops_of(&slot).contains(&"swtag_desched"));

    // and it is schedulable from its new queue, payload intact
    let relayed = downstream.get_work(8).unwrap();
    assert_eq!(relayed.queue_id, 1);
    assert_eq!(relayed.payload, 77);
}

#[test]
fn new_event_refuses_past_the_admission_limit() {
    let sched = soft_scheduler(1, 2);
    let mut slot = workslot(&sched);

    let item = WorkItem { tag: 0x1, sched_type: SchedType::Untagged, queue_id: 0, payload: 0 };
    assert!(slot.new_event(&item));
    assert!(slot.new_event(&item));
    // at the limit: backpressure is an explicit refusal, not a silent drop
    assert!(!slot.new_event(&item));

    // retiring one item re-opens admission
    assert!(slot.get_work(8).is_some());
    slot.release();
    assert!(slot.new_event(&item));
}

#[test]
fn enqueue_dispatches_by_operation() {
    let sched = soft_scheduler(2, 64);
    let mut slot = workslot(&sched);

    let item = WorkItem { tag: 0x9, sched_type: SchedType::Ordered, queue_id: 0, payload: 3 };
    assert!(slot.enqueue(&EventOp::New(item)));
    let got = slot.get_work(8).unwrap();

    let moved = WorkItem { queue_id: 1, ..got };
    assert!(slot.enqueue(&EventOp::Forward(moved)));
    assert_eq!(occupancy(&sched, 1), 1);

    let relayed = slot.get_work(8).unwrap();
    assert_eq!(relayed.queue_id, 1);
    assert!(slot.enqueue(&EventOp::Release));
    assert_eq!(sched.borrow().in_flight, 0);
}

#[test]
fn enqueue_new_burst_stops_at_the_admission_limit() {
    let sched = soft_scheduler(1, 3);
    let mut slot = workslot(&sched);

    let items = [WorkItem { tag: 0x1, sched_type: SchedType::Untagged, queue_id: 0, payload: 0 }; 5];
    assert_eq!(slot.enqueue_new_burst(&items), 3);
    assert_eq!(occupancy(&sched, 0), 3);
}

#[test]
fn drain_flushes_everything_immediately_available() {
    let sched = soft_scheduler(2, 64);
    let mut slot = workslot(&sched);

    for queue_id in [0u16, 1, 1] {
        let item = WorkItem { tag: 0x5, sched_type: SchedType::Ordered, queue_id, payload: 0 };
        assert!(slot.new_event(&item));
    }
    assert_eq!(sched.borrow().in_flight, 3);

    assert_eq!(slot.drain(), 3);
    assert_eq!(sched.borrow().in_flight, 0);
    assert_eq!(occupancy(&sched, 0), 0);
    assert_eq!(occupancy(&sched, 1), 0);
    // drain fetches without the wait-for-work request, so no fetch is left
    // outstanding on the emptied slot
    assert!(!slot.regs.wait_for_work.get());
    assert!(!slot.regs.tag_word.get().get_bit(TAG_FETCH_PENDING_BIT));
}
