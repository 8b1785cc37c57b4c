//! File-system collaborator (inode table)
//!
//! A thin bookkeeping layer consulted when a disk operation resolves. It
//! tracks which inodes are active, how many processes hold each one open,
//! and access/modification stamps in simulated time. The kernel never
//! depends on its return values beyond event reporting.
//!
//! A track maps to a disk block as `block = track * 521 + 8`; the inode
//! number is the block number. Inode sizes are derived deterministically
//! from the number so runs are reproducible.

use super::process::Process;
use std::collections::HashMap;

/// Disk block backing a track.
pub fn block_for_track(track: u32) -> u32 {
    track * 521 + 8
}

/// An active file's metadata.
#[derive(Debug)]
pub struct Inode {
    pub number: u32,
    /// How many live processes hold this file open.
    pub open_count: u32,
    /// Simulated file size in bytes.
    pub size: u64,
    pub created_at: u64,
    pub last_accessed: u64,
    pub last_modified: u64,
}

impl Inode {
    fn new(number: u32, now: u64) -> Self {
        Self {
            number,
            open_count: 0,
            size: 100 * (1 + u64::from(number) % 10) + u64::from(number) % 997,
            created_at: now,
            last_accessed: now,
            last_modified: now,
        }
    }
}

/// What an access notification did, for the event stream.
#[derive(Debug, Clone, Copy)]
pub struct FileAccess {
    pub inumber: u32,
    /// True when this access activated the inode (first open).
    pub opened: bool,
}

/// The table of active (open) files.
#[derive(Debug, Default)]
pub struct FileTable {
    inodes: HashMap<u32, Inode>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            inodes: HashMap::new(),
        }
    }

    pub fn find(&self, inumber: u32) -> Option<&Inode> {
        self.inodes.get(&inumber)
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Notification that a disk operation for `track` resolved on behalf of
    /// `proc`. Activates the inode if needed, records the open in the
    /// process's file list, and stamps the access.
    pub fn access(&mut self, proc: &mut Process, track: u32, write: bool, now: u64) -> FileAccess {
        let inumber = block_for_track(track);
        let opened = !self.inodes.contains_key(&inumber);
        let inode = self
            .inodes
            .entry(inumber)
            .or_insert_with(|| Inode::new(inumber, now));

        if !proc.has_opened(inumber) {
            proc.open_files.push(inumber);
            inode.open_count += 1;
            log::debug!("{} opened inode {inumber}", proc.name);
        }

        if write {
            inode.last_modified = now;
        } else {
            inode.last_accessed = now;
        }

        FileAccess { inumber, opened }
    }

    /// Release every file the finishing process holds open. An inode whose
    /// open count reaches zero is deactivated; the deactivated numbers are
    /// returned for the event stream.
    pub fn close_all(&mut self, proc: &Process) -> Vec<u32> {
        let mut closed = Vec::new();
        for &inumber in &proc.open_files {
            if let Some(inode) = self.inodes.get_mut(&inumber) {
                inode.open_count -= 1;
                if inode.open_count == 0 {
                    self.inodes.remove(&inumber);
                    closed.push(inumber);
                }
            }
        }
        closed
    }
}
