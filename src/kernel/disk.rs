//! Disk scheduler
//!
//! A physical-arm model driven on its own timeline. The arm sweeps the
//! surface one track per tick, reversing only at track 0 and at the track
//! limit (the SCAN / elevator discipline), so service order follows the
//! sweep, not request arrival order.
//!
//! Turnaround for a request is computed from the arm state at request time
//! (seek per track over the sweep distance, wrapping through the limit when
//! the target is behind the arm, plus a fixed operation cost) and the owning
//! process is charged for it immediately - pessimistic, up-front accounting.
//!
//! Pending requests live in a slab so a resolution removes its entry in
//! place without shifting the others.

use super::process::Pid;
use serde::Deserialize;
use slab::Slab;

/// Disk geometry and cost model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Highest track number; the arm reverses here and at track 0.
    pub track_limit: u32,
    /// Seek time per track moved, in u.t.
    pub seek_per_track: i64,
    /// Fixed cost of one read/write operation, in u.t.
    pub operation_cost: i64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            track_limit: 200,
            seek_per_track: 100,
            operation_cost: 5000,
        }
    }
}

/// One pending read or write.
#[derive(Debug, Clone)]
pub struct DiskRequest {
    /// The process charged for (and blocked on) this operation.
    pub pid: Pid,
    pub track: u32,
    /// Read when true, write when false.
    pub read: bool,
    /// Seek plus operation cost, computed at request time.
    pub turnaround: i64,
}

/// The simulated disk: arm state plus the pending-request queue.
#[derive(Debug)]
pub struct DiskScheduler {
    pending: Slab<DiskRequest>,
    /// Arm heading toward higher track numbers when true.
    forward: bool,
    curr_track: u32,
    config: DiskConfig,
}

impl DiskScheduler {
    pub fn new(config: DiskConfig) -> Self {
        Self {
            pending: Slab::new(),
            forward: true,
            curr_track: 0,
            config,
        }
    }

    pub fn curr_track(&self) -> u32 {
        self.curr_track
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    /// Time the disk will take to service the given track from the current
    /// arm state: sweep distance (wrapping through the extreme when the
    /// target is behind the arm) times seek cost, plus the operation cost.
    pub fn turnaround(&self, track: u32) -> i64 {
        let limit = i64::from(self.config.track_limit);
        let curr = i64::from(self.curr_track);
        let track = i64::from(track);

        let tracks = if self.forward {
            if track >= curr {
                track - curr
            } else {
                (limit - curr) + (limit - track)
            }
        } else if track <= curr {
            curr - track
        } else {
            curr + track
        };

        self.config.operation_cost + tracks * self.config.seek_per_track
    }

    /// Enqueue a read/write for the given process and return the turnaround
    /// the caller must charge it. A track outside `[0, track_limit]` is a
    /// caller contract violation.
    pub fn request(&mut self, pid: Pid, track: u32, read: bool) -> i64 {
        debug_assert!(
            track <= self.config.track_limit,
            "disk request for track {track} outside the surface"
        );
        let turnaround = self.turnaround(track);
        self.pending.insert(DiskRequest {
            pid,
            track,
            read,
            turnaround,
        });
        log::trace!(
            "{pid} requested {} at track {track} (turnaround {turnaround})",
            if read { "read" } else { "write" }
        );
        turnaround
    }

    /// One step of the disk timeline: resolve every pending request sitting
    /// under the arm, then move the arm one track (or flip direction at an
    /// extreme).
    pub fn tick(&mut self) -> Vec<DiskRequest> {
        let here: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, req)| req.track == self.curr_track)
            .map(|(key, _)| key)
            .collect();
        let completed: Vec<DiskRequest> = here.into_iter().map(|k| self.pending.remove(k)).collect();

        if self.forward {
            if self.curr_track == self.config.track_limit {
                self.forward = false;
            } else {
                self.curr_track += 1;
            }
        } else if self.curr_track == 0 {
            self.forward = true;
        } else {
            self.curr_track -= 1;
        }

        completed
    }
}
