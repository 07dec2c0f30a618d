//! A small FIFO work-queue and rayon-backed worker pool, used to drive a
//! conversion's per-tile transcode/reconstruct work across several threads.
//!
//! Grounded on the teacher's progress-reporting pattern in `tile/cache.rs`
//! (atomics read by a periodically-logging background task) and on the
//! `rayon`/`num_cpus` dependencies already present for parallel decoding.
//! Every `TiledSource`/`PyramidWriter` call is async, but rayon's worker
//! closures are synchronous, so each worker bridges back into the tokio
//! runtime with `Handle::block_on`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;

use crate::error::ConversionError;

/// One unit of work. Implementors do their own error accounting; `execute`
/// returns `Ok(())` or a stringified failure, rayon workers never panic on
/// task failure, they just record it and move on to the next command.
pub trait Command: Send {
    fn execute(&self, handle: &Handle) -> Result<(), String>;
}

/// A boxed, thread-safe FIFO queue of commands. Workers pop until it is
/// empty; there is no dependency ordering between commands, just ordinary
/// first-in-first-out fairness.
pub struct Bag {
    queue: Mutex<VecDeque<Box<dyn Command>>>,
}

impl Bag {
    pub fn new() -> Self {
        Bag { queue: Mutex::new(VecDeque::new()) }
    }

    pub fn push(&self, command: Box<dyn Command>) {
        self.queue.lock().expect("bag mutex poisoned").push_back(command);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("bag mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<Box<dyn Command>> {
        self.queue.lock().expect("bag mutex poisoned").pop_front()
    }
}

impl Default for Bag {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared progress counters, incremented by workers and read by the
/// background logger. Cheap enough to update on every tile.
#[derive(Default)]
pub struct Progress {
    completed: AtomicU64,
    failed: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Progress { completed: AtomicU64::new(0), failed: AtomicU64::new(0), total: AtomicU64::new(total) }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn record(&self, result: &Result<(), String>) {
        match result {
            Ok(()) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Runs every command in `bag` across `thread_count` worker threads, logging
/// progress at roughly 10Hz until the bag drains. `thread_count <= 1` runs
/// inline on the calling thread without spinning up a rayon pool, mirroring
/// the single-worker fast path of the original worker pool.
pub fn run(bag: Bag, thread_count: usize, label: &str) -> Result<(), ConversionError> {
    let total = bag.len() as u64;
    let progress = Arc::new(Progress::new(total));
    let handle = Handle::current();
    // Set by the first failing command; every worker checks it before
    // popping its next command so a fatal error drains in-flight work
    // rather than starting new work from the bag (spec §4.5/§7: "other
    // workers drain their in-flight commands").
    let aborted = Arc::new(AtomicBool::new(false));

    if thread_count <= 1 {
        while !aborted.load(Ordering::Relaxed) {
            let Some(command) = bag.pop() else { break };
            let result = command.execute(&handle);
            if result.is_err() {
                aborted.store(true, Ordering::Relaxed);
            }
            progress.record(&result);
        }
    } else {
        let bag = Arc::new(bag);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .build()
            .map_err(|e| ConversionError::Dicom(format!("failed to build worker pool: {}", e)))?;

        let progress_for_logger = progress.clone();
        let label = label.to_string();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_for_logger = stop.clone();
        let logger = std::thread::spawn(move || {
            while !stop_for_logger.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
                let done = progress_for_logger.completed() + progress_for_logger.failed();
                let total = progress_for_logger.total();
                if total > 0 {
                    info!("{}: {}/{} tiles processed", label, done, total);
                }
            }
        });

        pool.scope(|scope| {
            for _ in 0..thread_count {
                let bag = bag.clone();
                let progress = progress.clone();
                let handle = handle.clone();
                let aborted = aborted.clone();
                scope.spawn(move |_| {
                    while !aborted.load(Ordering::Relaxed) {
                        let Some(command) = bag.pop() else { break };
                        let result = command.execute(&handle);
                        if result.is_err() {
                            aborted.store(true, Ordering::Relaxed);
                        }
                        progress.record(&result);
                    }
                });
            }
        });

        stop.store(true, Ordering::Relaxed);
        let _ = logger.join();
    }

    let failed = progress.failed();
    if failed > 0 {
        return Err(ConversionError::TasksFailed { count: failed as usize, total: total as usize });
    }
    Ok(())
}
