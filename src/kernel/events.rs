//! Kernel event stream
//!
//! One-way notifications for the display front-end: process snapshots, disk
//! arm state, file and semaphore activity. Events go into a bounded ring
//! buffer - when it is full the oldest entry is dropped, so pushing never
//! blocks a kernel operation and a slow (or absent) consumer cannot stall
//! the simulation. Kernel correctness never depends on an event arriving.
//!
//! Each event kind is its own variant; there is no payload shared between
//! kinds, so a consumer can never read a field that is not there.

use super::process::Pid;
use serde::Serialize;
use std::collections::VecDeque;

/// Default ring-buffer capacity.
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// One observable kernel occurrence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A process was admitted to a ready queue after its segment loaded.
    ProcessAdmitted {
        pid: Pid,
        name: String,
        high_priority: bool,
        pages: usize,
        /// Bytes the load's eviction scan reclaimed, if any.
        reclaimed: i64,
    },
    /// State of the running process as one instruction is fetched.
    ProcessSnapshot {
        pid: Pid,
        name: String,
        remaining: i64,
        pc: usize,
        seg_id: u32,
        open_files: usize,
    },
    /// The CPU found nothing to run.
    CpuIdle,
    /// A process terminated and left every kernel structure.
    ProcessFinished { pid: Pid, name: String },
    /// A disk operation was enqueued and its owner charged.
    DiskRequested {
        pid: Pid,
        name: String,
        track: u32,
        read: bool,
        turnaround: i64,
    },
    /// The arm reached the request's track and resolved it.
    DiskCompleted { pid: Pid, track: u32, read: bool },
    /// Arm position after a tick that resolved work or reversed direction.
    DiskState {
        curr_track: u32,
        forward: bool,
        pending: usize,
    },
    /// An inode became active.
    FileOpened { name: String, inumber: u32 },
    /// An inode's last holder finished; the file is closed.
    FileClosed { name: String, inumber: u32 },
    /// A print request was issued.
    PrintRequested { pid: Pid, name: String, duration: i64 },
    /// The print device finished (instantaneous in this model).
    PrintCompleted { pid: Pid },
    /// A `P` succeeded without blocking.
    SemAcquired { pid: Pid, sem: String },
    /// A `P` parked its caller on the wait list.
    SemBlocked { pid: Pid, sem: String },
    /// A `V` ran; `woke` names the released waiter, if there was one.
    SemReleased { pid: Pid, sem: String, woke: Option<Pid> },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::ProcessAdmitted {
                pid,
                name,
                high_priority,
                pages,
                reclaimed,
            } => {
                write!(
                    f,
                    "{pid} {name} admitted ({} queue, {pages} pages, {reclaimed} bytes evicted)",
                    if *high_priority { "high" } else { "low" }
                )
            }
            Event::ProcessSnapshot {
                pid,
                name,
                remaining,
                pc,
                ..
            } => write!(f, "{pid} {name} pc={pc} remaining={remaining}"),
            Event::CpuIdle => write!(f, "cpu idle: no process ready"),
            Event::ProcessFinished { pid, name } => write!(f, "{pid} {name} finished"),
            Event::DiskRequested {
                pid,
                name,
                track,
                read,
                turnaround,
            } => write!(
                f,
                "{pid} {name} requested {} at track {track} (turnaround {turnaround})",
                if *read { "read" } else { "write" }
            ),
            Event::DiskCompleted { pid, track, read } => write!(
                f,
                "disk {} at track {track} completed for {pid}",
                if *read { "read" } else { "write" }
            ),
            Event::DiskState {
                curr_track,
                forward,
                pending,
            } => write!(
                f,
                "disk arm at track {curr_track} moving {} ({pending} pending)",
                if *forward { "forward" } else { "backward" }
            ),
            Event::FileOpened { name, inumber } => write!(f, "{name} opened inode {inumber}"),
            Event::FileClosed { name, inumber } => write!(f, "{name} closed inode {inumber}"),
            Event::PrintRequested {
                pid,
                name,
                duration,
            } => write!(f, "{pid} {name} printing for {duration} u.t."),
            Event::PrintCompleted { pid } => write!(f, "print completed for {pid}"),
            Event::SemAcquired { pid, sem } => write!(f, "{pid} acquired semaphore {sem}"),
            Event::SemBlocked { pid, sem } => write!(f, "{pid} blocked on semaphore {sem}"),
            Event::SemReleased { pid, sem, woke } => match woke {
                Some(w) => write!(f, "{pid} released semaphore {sem}, woke {w}"),
                None => write!(f, "{pid} released semaphore {sem}"),
            },
        }
    }
}

/// Bounded, fire-and-forget event buffer.
#[derive(Debug)]
pub struct EventBus {
    buf: VecDeque<Event>,
    capacity: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event, evicting the oldest entry if the buffer is full.
    pub fn push(&mut self, event: Event) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
            self.dropped += 1;
        }
        self.buf.push_back(event);
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&mut self) -> Vec<Event> {
        self.buf.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.buf.iter()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// How many events were discarded to make room.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUFFER_SIZE)
    }
}
