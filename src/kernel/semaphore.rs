//! Semaphore subsystem
//!
//! Named counting semaphores with FIFO blocking. `P` decrements and parks
//! the caller when the count goes negative; `V` increments and releases the
//! longest-waiting process. A negative count of `-n` means `n` processes are
//! waiting, and the wait list length always equals `max(0, -count)`.
//!
//! The subsystem never touches the scheduler directly: block and wake
//! effects go through the narrow [`Parking`] capability the kernel injects,
//! keeping the coupling one-way.

use super::process::Pid;
use std::collections::{HashMap, VecDeque};

/// The suspension capability the kernel supplies to `P`/`V`.
///
/// `block` parks the calling process in the scheduler's blocked queue;
/// `wake` moves a released process to the high-priority ready queue.
pub trait Parking {
    fn block(&mut self, pid: Pid);
    fn wake(&mut self, pid: Pid);
}

/// What a `P` operation did to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The semaphore was available; the caller holds it.
    Acquired,
    /// The caller was appended to the wait list and blocked.
    Blocked,
}

/// A named counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    count: i32,
    waiters: VecDeque<Pid>,
}

impl Semaphore {
    fn new(initial: i32) -> Self {
        Self {
            count: initial,
            waiters: VecDeque::new(),
        }
    }

    /// Current count; `-n` means `n` processes are waiting.
    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}

/// Registry of every semaphore the loaded programs declare.
#[derive(Debug, Default)]
pub struct SemaphoreTable {
    sems: HashMap<String, Semaphore>,
}

impl SemaphoreTable {
    pub fn new() -> Self {
        Self {
            sems: HashMap::new(),
        }
    }

    /// Register a semaphore with an initial count of 1 (mutex-by-default).
    /// Idempotent: re-registering an existing name leaves it untouched.
    pub fn register(&mut self, name: &str) {
        if !self.sems.contains_key(name) {
            self.sems.insert(name.to_string(), Semaphore::new(1));
            log::debug!("registered semaphore {name}");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sems.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<&Semaphore> {
        self.sems.get(name)
    }

    pub fn len(&self) -> usize {
        self.sems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sems.is_empty()
    }

    /// Dijkstra's `P`: decrement, and when the count goes negative append
    /// the caller to the wait list and suspend it through `parking`.
    ///
    /// Referencing an unregistered name is malformed program input and
    /// aborts (callers are expected to registration-check at parse time).
    pub fn p(&mut self, name: &str, pid: Pid, parking: &mut dyn Parking) -> Acquire {
        let sem = Self::expect(&mut self.sems, name);
        sem.count -= 1;
        let outcome = if sem.count < 0 {
            sem.waiters.push_back(pid);
            parking.block(pid);
            Acquire::Blocked
        } else {
            Acquire::Acquired
        };
        debug_assert_eq!(sem.waiters.len() as i32, (-sem.count).max(0));
        outcome
    }

    /// Dijkstra's `V`: increment, and when processes are waiting release the
    /// head of the FIFO through `parking`. Returns the woken pid, if any.
    pub fn v(&mut self, name: &str, parking: &mut dyn Parking) -> Option<Pid> {
        let sem = Self::expect(&mut self.sems, name);
        sem.count += 1;
        let woken = if sem.count <= 0 {
            let pid = sem
                .waiters
                .pop_front()
                .unwrap_or_else(|| panic!("semaphore {name} corrupt: count {} with empty wait list", sem.count));
            parking.wake(pid);
            Some(pid)
        } else {
            None
        };
        debug_assert_eq!(sem.waiters.len() as i32, (-sem.count).max(0));
        woken
    }

    fn expect<'a>(sems: &'a mut HashMap<String, Semaphore>, name: &str) -> &'a mut Semaphore {
        match sems.get_mut(name) {
            Some(sem) => sem,
            None => panic!("semaphore {name} referenced but never registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records block/wake calls instead of driving a scheduler.
    #[derive(Default)]
    struct RecordingParking {
        blocked: Vec<Pid>,
        woken: Vec<Pid>,
    }

    impl Parking for RecordingParking {
        fn block(&mut self, pid: Pid) {
            self.blocked.push(pid);
        }
        fn wake(&mut self, pid: Pid) {
            self.woken.push(pid);
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut table = SemaphoreTable::new();
        table.register("s");
        table.register("s");
        assert_eq!(table.len(), 1);
        assert_eq!(table.find("s").unwrap().count(), 1);
    }

    #[test]
    fn test_mutex_scenario() {
        // s starts at 1; A acquires, B blocks, A's release wakes B.
        let mut table = SemaphoreTable::new();
        let mut parking = RecordingParking::default();
        table.register("s");

        let a = Pid(1);
        let b = Pid(2);

        assert_eq!(table.p("s", a, &mut parking), Acquire::Acquired);
        assert_eq!(table.find("s").unwrap().count(), 0);
        assert!(parking.blocked.is_empty());

        assert_eq!(table.p("s", b, &mut parking), Acquire::Blocked);
        assert_eq!(table.find("s").unwrap().count(), -1);
        assert_eq!(parking.blocked, vec![b]);

        assert_eq!(table.v("s", &mut parking), Some(b));
        assert_eq!(table.find("s").unwrap().count(), 0);
        assert_eq!(table.find("s").unwrap().waiting(), 0);
        assert_eq!(parking.woken, vec![b]);
    }

    #[test]
    fn test_wakeups_are_fifo() {
        let mut table = SemaphoreTable::new();
        let mut parking = RecordingParking::default();
        table.register("s");

        table.p("s", Pid(1), &mut parking);
        table.p("s", Pid(2), &mut parking);
        table.p("s", Pid(3), &mut parking);
        table.p("s", Pid(4), &mut parking);

        assert_eq!(table.v("s", &mut parking), Some(Pid(2)));
        assert_eq!(table.v("s", &mut parking), Some(Pid(3)));
        assert_eq!(table.v("s", &mut parking), Some(Pid(4)));
        // Count back at 1 means nobody left to wake.
        assert_eq!(table.v("s", &mut parking), None);
    }

    #[test]
    fn test_count_conservation() {
        // After k P's and m V's from S0, S = S0 - k + m and the wait list
        // holds max(0, -S) processes.
        let mut table = SemaphoreTable::new();
        let mut parking = RecordingParking::default();
        table.register("s");

        for i in 0..5 {
            table.p("s", Pid(i), &mut parking);
        }
        let sem = table.find("s").unwrap();
        assert_eq!(sem.count(), 1 - 5);
        assert_eq!(sem.waiting(), 4);

        for _ in 0..2 {
            table.v("s", &mut parking);
        }
        let sem = table.find("s").unwrap();
        assert_eq!(sem.count(), 1 - 5 + 2);
        assert_eq!(sem.waiting(), 2);
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_unregistered_reference_is_fatal() {
        let mut table = SemaphoreTable::new();
        let mut parking = RecordingParking::default();
        table.p("ghost", Pid(1), &mut parking);
    }
}
