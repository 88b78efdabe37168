//! Timer thread plus bounded worker pool.
//!
//! One timer thread owns a min-heap of due tasks and hands them to a fixed
//! pool of workers over an MPMC job channel. A repeated task is re-armed by
//! the worker only after its run completes, so a task is never executed
//! concurrently with itself and a saturated pool delays runs instead of
//! dropping them.
//!
//! A panic inside a task is caught at the worker boundary and recorded in
//! the shared [`FaultSlot`]; the task is not re-armed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::RuntimeError;

/// Identifier returned by the `schedule_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Returned by repeated task bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

/// First recorded panic message from any runtime thread.
#[derive(Debug, Clone, Default)]
pub struct FaultSlot(Arc<Mutex<Option<String>>>);

impl FaultSlot {
    /// Record `message` unless a fault is already recorded.
    pub fn record(&self, message: String) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type TaskFn = Box<dyn FnMut() -> TaskControl + Send>;

struct Task {
    id: TaskId,
    period: Option<Duration>,
    due: Instant,
    cancelled: Arc<AtomicBool>,
    body: TaskFn,
}

struct Pending(Task);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.due == other.0.due && self.0.id == other.0.id
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap, earliest due must pop first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .due
            .cmp(&self.0.due)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

enum TimerCommand {
    Arm(Task),
    Shutdown,
}

/// Shared scheduler. Dropping the last reference shuts it down.
pub struct Scheduler {
    commands: Sender<TimerCommand>,
    cancel_flags: Arc<Mutex<HashMap<TaskId, Arc<AtomicBool>>>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl Scheduler {
    /// Spawn the timer thread and `workers` worker threads.
    pub fn new(workers: usize, faults: FaultSlot) -> Result<Self, RuntimeError> {
        let workers = workers.max(1);
        let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
        let (job_tx, job_rx) = unbounded::<Task>();
        let closed = Arc::new(AtomicBool::new(false));
        let cancel_flags = Arc::new(Mutex::new(HashMap::new()));
        let mut threads = Vec::with_capacity(workers + 1);

        let timer = thread::Builder::new()
            .name("robo-timer".into())
            .spawn(move || timer_loop(cmd_rx, job_tx))
            .map_err(|e| RuntimeError::ThreadSpawn(e.to_string()))?;
        threads.push(timer);

        for index in 0..workers {
            let jobs = job_rx.clone();
            let rearm = cmd_tx.clone();
            let worker_closed = Arc::clone(&closed);
            let flags = Arc::clone(&cancel_flags);
            let faults = faults.clone();
            let spawned = thread::Builder::new()
                .name(format!("robo-worker-{index}"))
                .spawn(move || worker_loop(jobs, rearm, worker_closed, flags, faults));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    // Unwind what was already started.
                    closed.store(true, Ordering::SeqCst);
                    let _ = cmd_tx.send(TimerCommand::Shutdown);
                    for t in threads {
                        let _ = t.join();
                    }
                    return Err(RuntimeError::ThreadSpawn(e.to_string()));
                }
            }
        }

        info!(workers, "scheduler started");
        Ok(Self {
            commands: cmd_tx,
            cancel_flags,
            next_id: AtomicU64::new(1),
            closed,
            threads: Mutex::new(threads),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn arm(&self, delay: Duration, period: Option<Duration>, body: TaskFn) -> Result<TaskId, RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancel_flags.lock().insert(id, Arc::clone(&cancelled));
        let task = Task {
            id,
            period,
            due: Instant::now() + delay,
            cancelled,
            body,
        };
        self.commands
            .send(TimerCommand::Arm(task))
            .map_err(|_| RuntimeError::Closed)?;
        Ok(id)
    }

    /// Run `f` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, f: F) -> Result<TaskId, RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut f = Some(f);
        self.arm(
            delay,
            None,
            Box::new(move || {
                if let Some(f) = f.take() {
                    f();
                }
                TaskControl::Stop
            }),
        )
    }

    /// Run `f` after `delay`, then every `period` until it returns
    /// [`TaskControl::Stop`] or the task is cancelled.
    pub fn schedule_repeated<F>(
        &self,
        delay: Duration,
        period: Duration,
        f: F,
    ) -> Result<TaskId, RuntimeError>
    where
        F: FnMut() -> TaskControl + Send + 'static,
    {
        self.arm(delay, Some(period), Box::new(f))
    }

    /// Cancel a task. A run already in flight completes; no further run starts.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.cancel_flags.lock().remove(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Stop the timer, drain the workers and join every thread.
    ///
    /// In-flight runs complete; pending runs are discarded.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(TimerCommand::Shutdown);
        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            // A worker may drop the last reference to its own scheduler.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        self.cancel_flags.lock().clear();
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(commands: Receiver<TimerCommand>, jobs: Sender<Task>) {
    let mut heap: BinaryHeap<Pending> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|p| p.0.due <= now) {
            let Some(Pending(task)) = heap.pop() else {
                break;
            };
            if task.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            if jobs.send(task).is_err() {
                return;
            }
        }

        let received = match heap.peek() {
            Some(next) => commands.recv_timeout(next.0.due.saturating_duration_since(now)),
            None => commands
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(TimerCommand::Arm(task)) => heap.push(Pending(task)),
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    debug!(discarded = heap.len(), "timer thread exiting");
    // Dropping `jobs` disconnects the workers.
}

fn worker_loop(
    jobs: Receiver<Task>,
    rearm: Sender<TimerCommand>,
    closed: Arc<AtomicBool>,
    flags: Arc<Mutex<HashMap<TaskId, Arc<AtomicBool>>>>,
    faults: FaultSlot,
) {
    while let Ok(mut task) = jobs.recv() {
        if task.cancelled.load(Ordering::SeqCst) {
            continue;
        }
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (task.body)()));
        let control = match outcome {
            Ok(control) => control,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(task = task.id.0, %message, "scheduled task panicked");
                faults.record(message);
                TaskControl::Stop
            }
        };

        let keep = control == TaskControl::Continue
            && !task.cancelled.load(Ordering::SeqCst)
            && !closed.load(Ordering::SeqCst);
        match (keep, task.period) {
            (true, Some(period)) => {
                // Fixed rate without catch-up bursts.
                let next = task.due + period;
                task.due = next.max(started);
                if rearm.send(TimerCommand::Arm(task)).is_err() {
                    break;
                }
            }
            _ => {
                flags.lock().remove(&task.id);
            }
        }
    }
}
