//! Process abstraction
//!
//! A process is one synthetic program in execution. Each process carries its
//! program counter, its segment binding, its scheduling class and remaining
//! execution budget, and the bookkeeping the other subsystems need (declared
//! semaphores, open inodes).
//!
//! Processes are owned exclusively by the [`ProcessTable`]; the scheduler
//! holds only `Pid`s while a process sits in one of its queues.

use super::memory::SegmentId;
use serde::Serialize;
use std::collections::HashMap;

/// Process identifier, assigned monotonically at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Process lifecycle state
///
/// `New -> Ready -> Running -> Blocked -> Ready -> ... -> Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Created but not yet admitted to a scheduler queue
    New,
    /// Sitting in the high or low ready queue
    Ready,
    /// Currently holding the CPU
    Running,
    /// Parked in the blocked queue waiting for I/O or a semaphore
    Blocked,
    /// Finished; no longer present in any kernel structure
    Terminated,
}

/// Scheduling class of a process, from its program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Admitted to the short-quantum queue
    High,
    /// Admitted to the long-quantum queue
    Low,
}

/// Where a process currently lives.
///
/// Exactly one location is valid at any instant; every transition goes
/// through the scheduler, which keeps this tag consistent so that "remove the
/// process from wherever it is" is a tag lookup, not a scan of three queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Not in any scheduler structure (just created, or being torn down)
    Nowhere,
    /// The scheduler's running slot
    Running,
    /// The high-priority ready queue
    ReadyHigh,
    /// The low-priority ready queue
    ReadyLow,
    /// The blocked queue
    Blocked,
}

/// One synthetic instruction.
///
/// This is the de facto input protocol for process programs; the parser in
/// [`crate::program`] produces it and the CPU loop evaluates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Burn `n` units of execution budget
    Exec(u32),
    /// Request a disk read at the given track
    Read(u32),
    /// Request a disk write at the given track
    Write(u32),
    /// Print for `n` units of device time
    Print(u32),
    /// Acquire the named semaphore, blocking if unavailable
    SemP(String),
    /// Release the named semaphore, waking the longest waiter
    SemV(String),
}

/// A process in the simulated system
#[derive(Debug)]
pub struct Process {
    /// Unique identifier
    pub pid: Pid,
    /// Program name from the synthetic program header
    pub name: String,
    /// Program counter, an index into the process's code
    pub pc: usize,
    /// Total number of instructions in the program
    pub code_len: usize,
    /// Segment this process's code lives in
    pub seg_id: SegmentId,
    /// Declared segment size in kilobytes
    pub seg_size_kb: u32,
    /// Scheduling class
    pub priority: Priority,
    /// Remaining execution budget in u.t.; signed, a deficit is carried
    pub remaining: i64,
    /// Lifecycle state
    pub state: ProcessState,
    /// Current scheduler location (see [`Location`])
    pub location: Location,
    /// Semaphore names declared in the program header
    pub semaphores: Vec<String>,
    /// Inode numbers this process currently holds open
    pub open_files: Vec<u32>,
}

impl Process {
    /// Create a fresh process from a parsed program descriptor.
    pub fn new(
        pid: Pid,
        name: String,
        seg_id: SegmentId,
        seg_size_kb: u32,
        priority: Priority,
        code_len: usize,
        semaphores: Vec<String>,
    ) -> Self {
        Self {
            pid,
            name,
            pc: 0,
            code_len,
            seg_id,
            seg_size_kb,
            priority,
            remaining: 0,
            state: ProcessState::New,
            location: Location::Nowhere,
            semaphores,
            open_files: Vec::new(),
        }
    }

    /// Has this process executed its whole program?
    pub fn at_end(&self) -> bool {
        self.pc >= self.code_len
    }

    /// Has this process opened the given inode before?
    pub fn has_opened(&self, inumber: u32) -> bool {
        self.open_files.contains(&inumber)
    }
}

/// Registry of live processes, indexed by id.
///
/// Owns every process for its lifetime; ids are handed out monotonically and
/// never reused.
#[derive(Debug)]
pub struct ProcessTable {
    table: HashMap<Pid, Process>,
    next_id: u32,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            next_id: 1, // 0 is reserved for the kernel itself
        }
    }

    /// Hand out the next process id.
    pub fn allocate_pid(&mut self) -> Pid {
        let pid = Pid(self.next_id);
        self.next_id += 1;
        pid
    }

    /// Register a process. Registering the same pid twice is a bookkeeping
    /// bug and aborts.
    pub fn insert(&mut self, proc: Process) {
        let pid = proc.pid;
        if self.table.insert(pid, proc).is_some() {
            panic!("process table corrupt: {pid} registered twice");
        }
    }

    /// Remove and return a process. Removing an unknown pid is a bookkeeping
    /// bug (double finish) and aborts.
    pub fn remove(&mut self, pid: Pid) -> Process {
        match self.table.remove(&pid) {
            Some(proc) => proc,
            None => panic!("process table corrupt: {pid} finished twice or never created"),
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.table.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.table.get_mut(&pid)
    }

    /// Fetch a process the caller knows must exist (e.g. it is in a
    /// scheduler queue). Absence is a bookkeeping bug and aborts.
    pub fn expect_mut(&mut self, pid: Pid) -> &mut Process {
        match self.table.get_mut(&pid) {
            Some(proc) => proc,
            None => panic!("process table corrupt: {pid} referenced but not registered"),
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.table.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.table.values()
    }
}
