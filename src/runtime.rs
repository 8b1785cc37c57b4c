//! Device timelines
//!
//! One OS thread per simulated device - CPU and disk - each advancing on its
//! own wall-clock cadence. Both share the kernel behind a single mutex;
//! every logical operation (a CPU tick, a disk tick, an admission) acquires
//! it once, runs to completion, and releases it, so operations are atomic
//! with respect to each other and no thread ever holds two locks.
//!
//! The CPU thread never spins on an empty scheduler: when a tick finds
//! nothing runnable it parks on a condition variable, and every path that
//! can make work runnable (admission, a disk completion) signals it.

use crate::kernel::{CpuTick, Kernel, KernelConfig, Pid};
use crate::program::Program;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Shared {
    kernel: Mutex<Kernel>,
    /// Signalled whenever work may have become runnable, and on shutdown.
    cpu_wake: Condvar,
    stop: AtomicBool,
}

/// A lock-guarded handle to the kernel, shared by the device threads and
/// the front-end.
#[derive(Clone)]
pub struct SharedKernel {
    shared: Arc<Shared>,
}

/// Join handles for the running device threads.
pub struct RuntimeHandles {
    cpu: JoinHandle<()>,
    disk: JoinHandle<()>,
}

impl RuntimeHandles {
    /// Wait for both device threads to exit (after
    /// [`SharedKernel::shutdown`]).
    pub fn join(self) {
        if self.cpu.join().is_err() {
            log::error!("cpu thread terminated by a fatal error");
        }
        if self.disk.join().is_err() {
            log::error!("disk thread terminated by a fatal error");
        }
    }
}

impl SharedKernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                kernel: Mutex::new(Kernel::new(config)),
                cpu_wake: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Kernel> {
        self.shared
            .kernel
            .lock()
            .expect("kernel state poisoned by a fatal error")
    }

    /// Run one operation against the kernel under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> R {
        f(&mut self.lock())
    }

    /// Admit a program and wake the CPU thread if it was parked.
    pub fn admit(&self, program: Program) -> Pid {
        let pid = self.with(|kernel| kernel.admit(program));
        self.shared.cpu_wake.notify_all();
        pid
    }

    /// Spawn the CPU and disk threads.
    pub fn start(&self) -> RuntimeHandles {
        let (cpu_tick, disk_tick) = self.with(|kernel| {
            (
                Duration::from_millis(kernel.config().cpu_tick_ms),
                Duration::from_millis(kernel.config().disk_tick_ms),
            )
        });

        let cpu = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("simkern-cpu".into())
                .spawn(move || cpu_loop(&shared, cpu_tick))
                .expect("failed to spawn the cpu thread")
        };
        let disk = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("simkern-disk".into())
                .spawn(move || disk_loop(&shared, disk_tick))
                .expect("failed to spawn the disk thread")
        };
        RuntimeHandles { cpu, disk }
    }

    /// Ask the device threads to exit.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cpu_wake.notify_all();
    }

    /// Block until every process has terminated and the disk has drained.
    pub fn wait_quiescent(&self) {
        let mut kernel = self.lock();
        while !kernel.is_quiescent() {
            let (guard, _) = self
                .shared
                .cpu_wake
                .wait_timeout(kernel, Duration::from_millis(50))
                .expect("kernel state poisoned by a fatal error");
            kernel = guard;
        }
    }
}

fn cpu_loop(shared: &Shared, tick: Duration) {
    while !shared.stop.load(Ordering::SeqCst) {
        let mut kernel = shared
            .kernel
            .lock()
            .expect("kernel state poisoned by a fatal error");
        let outcome = kernel.cpu_tick();
        let quiescent = kernel.is_quiescent();

        match outcome {
            CpuTick::Idle => {
                // Park on the guard from this tick so a completion between
                // the tick and the wait cannot slip by unseen.
                let (guard, _) = shared
                    .cpu_wake
                    .wait_timeout(kernel, tick.max(Duration::from_millis(10)))
                    .expect("kernel state poisoned by a fatal error");
                drop(guard);
            }
            _ => {
                drop(kernel);
                if quiescent {
                    shared.cpu_wake.notify_all();
                }
                thread::sleep(tick);
            }
        }
    }
}

fn disk_loop(shared: &Shared, tick: Duration) {
    while !shared.stop.load(Ordering::SeqCst) {
        thread::sleep(tick);
        let resolved = {
            let mut kernel = shared
                .kernel
                .lock()
                .expect("kernel state poisoned by a fatal error");
            kernel.disk_tick()
        };
        if resolved > 0 {
            shared.cpu_wake.notify_all();
        }
    }
}
