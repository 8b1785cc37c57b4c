//! Process scheduler
//!
//! Multilevel feedback queues with quantum-based preemption. Three queues:
//! `high` (short quantum, newly-ready and just-unblocked work), `low` (long
//! quantum, quantum-exhausted work) and `blocked` (quantum-less parking for
//! I/O and semaphore waits).
//!
//! On dispatch a process's budget is recharged *additively* with the queue's
//! quantum, clamped to `[quantum_floor, quantum]` - a process that yielded
//! with leftover budget keeps credit up to the queue bound.
//!
//! The scheduler holds only `Pid`s; process records stay in the
//! [`ProcessTable`](super::process::ProcessTable) and their `location` tag is
//! kept consistent with the queue that holds them.

use super::process::{Location, Pid, ProcessState, ProcessTable};
use std::collections::VecDeque;

/// Which ready queue a process should (re)enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueClass {
    High,
    Low,
}

/// What caused a call to [`Scheduler::schedule`].
///
/// The cause drives the disposition of the process that was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleCause {
    /// No disposition: the previous process finished or was interrupted with
    /// no other cause; the caller has already removed it.
    None,
    /// The previous process issued a disk or print request
    IoRequested,
    /// The previous process blocked on a semaphore
    SemaphoreBlocked,
    /// The previous process exhausted its quantum
    QuantumCompleted,
}

/// An ordered ready queue plus the quantum it grants on dispatch.
#[derive(Debug)]
struct ReadyQueue {
    quantum: i64,
    queue: VecDeque<Pid>,
}

impl ReadyQueue {
    fn new(quantum: i64) -> Self {
        Self {
            quantum,
            queue: VecDeque::new(),
        }
    }
}

/// The process scheduler.
#[derive(Debug)]
pub struct Scheduler {
    high: ReadyQueue,
    low: ReadyQueue,
    /// Unordered parking for blocked processes; no quantum is associated.
    blocked: Vec<Pid>,
    /// The process currently holding the CPU, if any.
    running: Option<Pid>,
    quantum_floor: i64,
}

impl Scheduler {
    pub fn new(high_quantum: i64, low_quantum: i64, quantum_floor: i64) -> Self {
        debug_assert!(quantum_floor <= high_quantum && quantum_floor <= low_quantum);
        Self {
            high: ReadyQueue::new(high_quantum),
            low: ReadyQueue::new(low_quantum),
            blocked: Vec::new(),
            running: None,
            quantum_floor,
        }
    }

    /// The currently running process, if any.
    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    /// Is there anything waiting in a ready queue?
    pub fn has_ready(&self) -> bool {
        !self.high.queue.is_empty() || !self.low.queue.is_empty()
    }

    pub fn high_len(&self) -> usize {
        self.high.queue.len()
    }

    pub fn low_len(&self) -> usize {
        self.low.queue.len()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    /// Select the next process to run and dispose of the previous one.
    ///
    /// Pops from `high` if non-empty, else from `low`, else runs nothing.
    /// The popped process's budget is recharged additively and clamped to
    /// `[quantum_floor, queue quantum]`. Disposition of the previously
    /// running process follows `cause`. Returns the newly running pid.
    pub fn schedule(&mut self, procs: &mut ProcessTable, cause: ScheduleCause) -> Option<Pid> {
        // Selection happens before disposition, so a preempted process never
        // leapfrogs work already queued ahead of it.
        let next = if let Some(pid) = self.high.queue.pop_front() {
            let proc = procs.expect_mut(pid);
            proc.remaining = (proc.remaining + self.high.quantum)
                .clamp(self.quantum_floor, self.high.quantum);
            Some(pid)
        } else if let Some(pid) = self.low.queue.pop_front() {
            let proc = procs.expect_mut(pid);
            proc.remaining =
                (proc.remaining + self.low.quantum).clamp(self.quantum_floor, self.low.quantum);
            Some(pid)
        } else {
            None
        };

        if let Some(prev) = self.running.take() {
            match cause {
                ScheduleCause::IoRequested | ScheduleCause::SemaphoreBlocked => {
                    let proc = procs.expect_mut(prev);
                    proc.state = ProcessState::Blocked;
                    proc.location = Location::Blocked;
                    self.blocked.push(prev);
                }
                ScheduleCause::QuantumCompleted => {
                    let proc = procs.expect_mut(prev);
                    proc.state = ProcessState::Ready;
                    proc.location = Location::ReadyHigh;
                    self.high.queue.push_back(prev);
                }
                ScheduleCause::None => {
                    // The caller already removed (or is removing) the
                    // process; just drop our reference to it.
                    if let Some(proc) = procs.get_mut(prev) {
                        proc.location = Location::Nowhere;
                    }
                }
            }
        }

        if let Some(pid) = next {
            let proc = procs.expect_mut(pid);
            proc.state = ProcessState::Running;
            proc.location = Location::Running;
            log::trace!("dispatched {pid} with budget {}", proc.remaining);
        }

        self.running = next;
        next
    }

    /// Admit a process to a ready queue (initial admission after its segment
    /// is loaded, or re-entry after an I/O or semaphore wait).
    pub fn enqueue(&mut self, procs: &mut ProcessTable, pid: Pid, class: QueueClass) {
        let proc = procs.expect_mut(pid);
        debug_assert!(
            matches!(proc.location, Location::Nowhere),
            "{pid} enqueued while still located at {:?}",
            proc.location
        );
        proc.state = ProcessState::Ready;
        match class {
            QueueClass::High => {
                proc.location = Location::ReadyHigh;
                self.high.queue.push_back(pid);
            }
            QueueClass::Low => {
                proc.location = Location::ReadyLow;
                self.low.queue.push_back(pid);
            }
        }
    }

    /// Move a process out of the blocked queue into a ready queue. Removal
    /// is a no-op if the process is not parked there.
    pub fn unblock(&mut self, procs: &mut ProcessTable, pid: Pid, class: QueueClass) {
        if let Some(pos) = self.blocked.iter().position(|&p| p == pid) {
            self.blocked.swap_remove(pos);
            procs.expect_mut(pid).location = Location::Nowhere;
        }
        self.enqueue(procs, pid, class);
    }

    /// Evict a process from whichever structure currently holds it, given
    /// its location tag. Used by process termination; an inconsistent tag is
    /// a bookkeeping bug and aborts.
    pub fn evict(&mut self, pid: Pid, location: Location) {
        match location {
            Location::Nowhere => {}
            Location::Running => {
                if self.running != Some(pid) {
                    panic!("scheduler corrupt: {pid} tagged running but is not");
                }
                self.running = None;
            }
            Location::ReadyHigh => Self::remove_from(&mut self.high.queue, pid),
            Location::ReadyLow => Self::remove_from(&mut self.low.queue, pid),
            Location::Blocked => {
                match self.blocked.iter().position(|&p| p == pid) {
                    Some(pos) => {
                        self.blocked.swap_remove(pos);
                    }
                    None => panic!("scheduler corrupt: {pid} tagged blocked but is not"),
                };
            }
        }
    }

    fn remove_from(queue: &mut VecDeque<Pid>, pid: Pid) {
        match queue.iter().position(|&p| p == pid) {
            Some(pos) => {
                queue.remove(pos);
            }
            None => panic!("scheduler corrupt: {pid} tagged ready but absent from its queue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::memory::SegmentId;
    use crate::kernel::process::{Priority, Process};

    const HIGH_Q: i64 = 10;
    const LOW_Q: i64 = 2000;

    fn setup(n: u32) -> (Scheduler, ProcessTable, Vec<Pid>) {
        let mut procs = ProcessTable::new();
        let mut pids = Vec::new();
        for _ in 0..n {
            let pid = procs.allocate_pid();
            procs.insert(Process::new(
                pid,
                format!("p{}", pid.0),
                SegmentId(pid.0),
                4,
                Priority::High,
                10,
                Vec::new(),
            ));
            pids.push(pid);
        }
        (Scheduler::new(HIGH_Q, LOW_Q, 0), procs, pids)
    }

    #[test]
    fn test_fifo_within_priority() {
        let (mut sched, mut procs, pids) = setup(3);
        for &pid in &pids {
            sched.enqueue(&mut procs, pid, QueueClass::High);
        }
        // Popped in enqueue order.
        for &pid in &pids {
            let got = sched.schedule(&mut procs, ScheduleCause::None);
            assert_eq!(got, Some(pid));
            sched.evict(pid, Location::Running);
            procs.expect_mut(pid).location = Location::Nowhere;
        }
    }

    #[test]
    fn test_high_drains_before_low() {
        let (mut sched, mut procs, pids) = setup(2);
        sched.enqueue(&mut procs, pids[0], QueueClass::Low);
        sched.enqueue(&mut procs, pids[1], QueueClass::High);
        assert_eq!(sched.schedule(&mut procs, ScheduleCause::None), Some(pids[1]));
        assert_eq!(sched.schedule(&mut procs, ScheduleCause::None), Some(pids[0]));
    }

    #[test]
    fn test_recharge_is_additive_and_clamped() {
        let (mut sched, mut procs, pids) = setup(1);
        let pid = pids[0];

        // Leftover credit accumulates but never exceeds the queue quantum.
        procs.expect_mut(pid).remaining = 4;
        sched.enqueue(&mut procs, pid, QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None);
        assert_eq!(procs.get(pid).unwrap().remaining, HIGH_Q);

        // A deficit is forgiven up to the floor.
        let proc = procs.expect_mut(pid);
        proc.remaining = -500;
        proc.location = Location::Nowhere;
        sched.running = None;
        sched.enqueue(&mut procs, pid, QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None);
        assert_eq!(procs.get(pid).unwrap().remaining, 0);

        // A small deficit recharges additively.
        let proc = procs.expect_mut(pid);
        proc.remaining = -4;
        proc.location = Location::Nowhere;
        sched.running = None;
        sched.enqueue(&mut procs, pid, QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None);
        assert_eq!(procs.get(pid).unwrap().remaining, HIGH_Q - 4);
    }

    #[test]
    fn test_quantum_completed_reenters_high() {
        let (mut sched, mut procs, pids) = setup(2);
        sched.enqueue(&mut procs, pids[0], QueueClass::High);
        sched.enqueue(&mut procs, pids[1], QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None);

        // Preempt p0: p1 runs, p0 re-enters high behind nothing.
        sched.schedule(&mut procs, ScheduleCause::QuantumCompleted);
        assert_eq!(sched.running(), Some(pids[1]));
        assert_eq!(procs.get(pids[0]).unwrap().state, ProcessState::Ready);
        assert_eq!(procs.get(pids[0]).unwrap().location, Location::ReadyHigh);

        // Next schedule resumes p0.
        sched.schedule(&mut procs, ScheduleCause::QuantumCompleted);
        assert_eq!(sched.running(), Some(pids[0]));
    }

    #[test]
    fn test_io_request_blocks_and_unblock_reenters() {
        let (mut sched, mut procs, pids) = setup(1);
        let pid = pids[0];
        sched.enqueue(&mut procs, pid, QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None);

        sched.schedule(&mut procs, ScheduleCause::IoRequested);
        assert_eq!(sched.running(), None);
        assert_eq!(sched.blocked_len(), 1);
        assert_eq!(procs.get(pid).unwrap().state, ProcessState::Blocked);

        sched.unblock(&mut procs, pid, QueueClass::Low);
        assert_eq!(sched.blocked_len(), 0);
        assert_eq!(sched.low_len(), 1);
        assert_eq!(procs.get(pid).unwrap().location, Location::ReadyLow);
    }

    #[test]
    fn test_schedule_with_nothing_ready() {
        let (mut sched, mut procs, _) = setup(0);
        assert_eq!(sched.schedule(&mut procs, ScheduleCause::None), None);
        assert_eq!(sched.running(), None);
    }

    #[test]
    fn test_queue_exclusivity_across_transitions() {
        let (mut sched, mut procs, pids) = setup(3);
        for &pid in &pids {
            sched.enqueue(&mut procs, pid, QueueClass::High);
        }
        sched.schedule(&mut procs, ScheduleCause::None);
        sched.schedule(&mut procs, ScheduleCause::IoRequested);
        sched.schedule(&mut procs, ScheduleCause::QuantumCompleted);

        // Each live process appears in exactly one place.
        let mut counts = std::collections::HashMap::new();
        if let Some(pid) = sched.running() {
            *counts.entry(pid).or_insert(0) += 1;
        }
        for i in 0..sched.high_len() {
            *counts.entry(sched.high.queue[i]).or_insert(0) += 1;
        }
        for i in 0..sched.low_len() {
            *counts.entry(sched.low.queue[i]).or_insert(0) += 1;
        }
        for &pid in &sched.blocked {
            *counts.entry(pid).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 1));
    }

    #[test]
    fn test_evict_from_each_location() {
        let (mut sched, mut procs, pids) = setup(3);
        sched.enqueue(&mut procs, pids[0], QueueClass::High);
        sched.enqueue(&mut procs, pids[1], QueueClass::Low);
        sched.enqueue(&mut procs, pids[2], QueueClass::High);
        sched.schedule(&mut procs, ScheduleCause::None); // p0 runs
        sched.schedule(&mut procs, ScheduleCause::IoRequested); // p0 blocked, p2 runs

        sched.evict(pids[0], Location::Blocked);
        sched.evict(pids[1], Location::ReadyLow);
        sched.evict(pids[2], Location::Running);
        assert_eq!(sched.blocked_len(), 0);
        assert_eq!(sched.low_len(), 0);
        assert_eq!(sched.running(), None);
    }

    #[test]
    #[should_panic(expected = "scheduler corrupt")]
    fn test_evict_with_stale_tag_is_fatal() {
        let (mut sched, _, pids) = setup(1);
        sched.evict(pids[0], Location::Blocked);
    }
}
