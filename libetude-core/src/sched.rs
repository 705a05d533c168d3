// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sched` module implements the priority task scheduler.
//!
//! A bounded priority queue feeds a pool of worker threads. Tasks dequeue highest-priority
//! first and FIFO within equal priority. A deadline, when given, is only used for statistics:
//! the scheduler never preempts a running task, it just counts the miss. Real-time mode
//! reserves one worker exclusively for audio-class tasks so bulk work cannot starve the
//! stream.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::errors::{invalid_argument_error, invalid_state_error, Result};

/// The scheduling class of a task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskClass {
    Normal,
    /// Streaming audio work; may claim the reserved worker in real-time mode.
    Audio,
}

/// A task id, unique for the scheduler's lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// The completion record passed to a task's completion callback.
#[derive(Copy, Clone, Debug)]
pub struct TaskReport {
    pub id: TaskId,
    /// Wall time the task body ran for.
    pub elapsed: Duration,
    pub missed_deadline: bool,
}

/// A unit of work for the scheduler.
pub struct Task {
    pub priority: u32,
    pub class: TaskClass,
    /// Absolute completion deadline. Only statistics are affected when it passes.
    pub deadline: Option<Instant>,
    pub run: Box<dyn FnOnce() + Send>,
    pub on_complete: Option<Box<dyn FnOnce(TaskReport) + Send>>,
}

impl Task {
    pub fn new(run: impl FnOnce() + Send + 'static) -> Task {
        Task { priority: 0, class: TaskClass::Normal, deadline: None, run: Box::new(run), on_complete: None }
    }

    pub fn with_priority(mut self, priority: u32) -> Task {
        self.priority = priority;
        self
    }

    pub fn with_class(mut self, class: TaskClass) -> Task {
        self.class = class;
        self
    }

    /// Sets the deadline `micros` microseconds from now.
    pub fn with_deadline_us(mut self, micros: u64) -> Task {
        self.deadline = Some(Instant::now() + Duration::from_micros(micros));
        self
    }

    pub fn with_completion(mut self, f: impl FnOnce(TaskReport) + Send + 'static) -> Task {
        self.on_complete = Some(Box::new(f));
        self
    }
}

struct QueuedTask {
    priority: u32,
    seq: u64,
    id: TaskId,
    deadline: Option<Instant>,
    run: Box<dyn FnOnce() + Send>,
    on_complete: Option<Box<dyn FnOnce(TaskReport) + Send>>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; earlier submission first within a priority.
        self.priority.cmp(&other.priority).then(other.seq.cmp(&self.seq))
    }
}

/// A read-only snapshot of scheduler statistics.
#[derive(Copy, Clone, Debug, Default)]
pub struct SchedulerStats {
    pub executed: u64,
    pub missed_deadlines: u64,
    /// The largest queue depth observed.
    pub peak_queued: u64,
    pub total_busy: Duration,
}

/// Options for creating a [`Scheduler`].
#[derive(Copy, Clone, Debug)]
pub struct SchedulerOptions {
    /// Worker thread count. Zero selects the host parallelism, overridable with the
    /// `LIBETUDE_NUM_THREADS` environment variable.
    pub num_workers: usize,
    /// Maximum number of queued tasks.
    pub queue_limit: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions { num_workers: 0, queue_limit: 1024 }
    }
}

struct Queues {
    normal: BinaryHeap<QueuedTask>,
    audio: BinaryHeap<QueuedTask>,
    shutdown: bool,
}

impl Queues {
    fn len(&self) -> usize {
        self.normal.len() + self.audio.len()
    }
}

struct Shared {
    queues: Mutex<Queues>,
    available: Condvar,
    realtime: AtomicBool,
    next_seq: AtomicU64,
    next_id: AtomicU64,
    executed: AtomicU64,
    missed_deadlines: AtomicU64,
    peak_queued: AtomicU64,
    busy_nanos: AtomicU64,
    queue_limit: usize,
}

/// `Scheduler` runs submitted tasks on a pool of worker threads.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(opts: SchedulerOptions) -> Result<Scheduler> {
        let num_workers = resolve_worker_count(opts.num_workers);
        if opts.queue_limit == 0 {
            return invalid_argument_error("queue limit must be non-zero");
        }

        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                normal: BinaryHeap::new(),
                audio: BinaryHeap::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            realtime: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            missed_deadlines: AtomicU64::new(0),
            peak_queued: AtomicU64::new(0),
            busy_nanos: AtomicU64::new(0),
            queue_limit: opts.queue_limit,
        });

        debug!("starting scheduler with {} workers", num_workers);

        let workers = (0..num_workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                // Worker zero is the reserved audio worker in real-time mode.
                let reserved = index == 0 && num_workers > 1;
                std::thread::Builder::new()
                    .name(format!("etude-worker-{}", index))
                    .spawn(move || worker_loop(shared, reserved))
                    .map_err(|err| {
                        crate::errors::Error::with_source(
                            crate::errors::ErrorKind::Internal,
                            "failed to spawn worker thread",
                            err,
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Scheduler { shared, workers })
    }

    /// Submits a task for execution. Fails when the queue is at its limit or the scheduler is
    /// shutting down.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);

        let queued = QueuedTask {
            priority: task.priority,
            seq,
            id,
            deadline: task.deadline,
            run: task.run,
            on_complete: task.on_complete,
        };

        {
            let mut queues = self.shared.queues.lock();

            if queues.shutdown {
                return invalid_state_error("scheduler is shut down");
            }
            if queues.len() >= self.shared.queue_limit {
                return invalid_state_error("task queue is full");
            }

            match task.class {
                TaskClass::Audio => queues.audio.push(queued),
                TaskClass::Normal => queues.normal.push(queued),
            }

            let depth = queues.len() as u64;
            self.shared.peak_queued.fetch_max(depth, Ordering::Relaxed);
        }

        self.shared.available.notify_one();
        Ok(id)
    }

    /// Enables or disables real-time mode. While enabled, worker zero only runs audio-class
    /// tasks.
    pub fn set_realtime(&self, enabled: bool) {
        self.shared.realtime.store(enabled, Ordering::Release);
        self.shared.available.notify_all();
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            executed: self.shared.executed.load(Ordering::Relaxed),
            missed_deadlines: self.shared.missed_deadlines.load(Ordering::Relaxed),
            peak_queued: self.shared.peak_queued.load(Ordering::Relaxed),
            total_busy: Duration::from_nanos(self.shared.busy_nanos.load(Ordering::Relaxed)),
        }
    }

    /// The number of tasks waiting to run.
    pub fn queued(&self) -> usize {
        self.shared.queues.lock().len()
    }

    /// Signals shutdown, joins every worker after outstanding tasks drain, and returns the final
    /// statistics.
    pub fn shutdown(mut self) -> SchedulerStats {
        self.begin_shutdown();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("scheduler worker panicked during shutdown");
            }
        }

        self.stats()
    }

    fn begin_shutdown(&self) {
        self.shared.queues.lock().shutdown = true;
        self.shared.available.notify_all();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.begin_shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn resolve_worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }

    if let Ok(value) = std::env::var("LIBETUDE_NUM_THREADS") {
        match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => warn!("ignoring invalid LIBETUDE_NUM_THREADS value"),
        }
    }

    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
}

fn worker_loop(shared: Arc<Shared>, reserved: bool) {
    loop {
        let task = {
            let mut queues = shared.queues.lock();

            loop {
                let realtime = shared.realtime.load(Ordering::Acquire);
                let audio_only = reserved && realtime;

                let has_work = if audio_only {
                    !queues.audio.is_empty()
                }
                else {
                    !queues.audio.is_empty() || !queues.normal.is_empty()
                };

                if has_work {
                    break;
                }
                if queues.shutdown {
                    return;
                }

                shared.available.wait(&mut queues);
            }

            let realtime = shared.realtime.load(Ordering::Acquire);
            let audio_only = reserved && realtime;

            if audio_only {
                queues.audio.pop()
            }
            else {
                // Pick the higher-priority head across both classes, audio winning ties.
                let from_audio = match (queues.audio.peek(), queues.normal.peek()) {
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(n)) => a.cmp(n) != std::cmp::Ordering::Less,
                    (None, None) => continue,
                };

                if from_audio {
                    queues.audio.pop()
                }
                else {
                    queues.normal.pop()
                }
            }
        };

        let task = match task {
            Some(task) => task,
            None => continue,
        };

        let started = Instant::now();
        (task.run)();
        let elapsed = started.elapsed();

        let missed = task.deadline.map(|deadline| Instant::now() > deadline).unwrap_or(false);

        shared.executed.fetch_add(1, Ordering::Relaxed);
        shared.busy_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if missed {
            shared.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(on_complete) = task.on_complete {
            on_complete(TaskReport { id: task.id, elapsed, missed_deadline: missed });
        }
    }
}
