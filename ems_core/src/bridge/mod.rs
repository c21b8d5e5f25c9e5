//! Protocol bridge boundary.
//!
//! A bridge owns the connection to one field bus. At EXECUTE_WRITE it asks
//! its [`MetaTaskPool`] which tasks to service this tick and hands them to
//! a worker thread, so the engine never waits on hardware. Tasks deliver
//! read results with `Channel::set_next_value` and apply write commands
//! captured by the shadow copy.
//!
//! Wire protocols are out of scope; [`SimulatedBridge`] executes tasks that
//! talk to in-process device models.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cycle::{CycleContext, Phase, PhaseListener, PhaseMask};
use crate::error::{BridgeError, PhaseError};
use crate::task::{ManagedTask, MetaTaskPool, Priority, TaskId};

/// A managed task executed on a bridge worker thread.
pub trait BridgeTask: ManagedTask {
    /// `now` is the clock reading of the tick that dispatched the task.
    fn execute(&self, now: Instant) -> Result<(), BridgeError>;
}

/// Closure-backed [`BridgeTask`].
pub struct FnTask<F> {
    name: String,
    priority: Priority,
    run: F,
}

impl<F> FnTask<F>
where
    F: Fn(Instant) -> Result<(), BridgeError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, priority: Priority, run: F) -> Self {
        Self {
            name: name.into(),
            priority,
            run,
        }
    }
}

impl<F> ManagedTask for FnTask<F>
where
    F: Fn(Instant) -> Result<(), BridgeError> + Send + Sync,
{
    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> BridgeTask for FnTask<F>
where
    F: Fn(Instant) -> Result<(), BridgeError> + Send + Sync,
{
    fn execute(&self, now: Instant) -> Result<(), BridgeError> {
        (self.run)(now)
    }
}

type SharedPool = Arc<Mutex<MetaTaskPool<dyn BridgeTask>>>;

#[derive(Debug, Default)]
struct Counts {
    dispatched: u64,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Default)]
struct Progress {
    counts: Mutex<Counts>,
    idle: Condvar,
}

struct Batch {
    cycle: u64,
    now: Instant,
    tasks: Vec<Arc<dyn BridgeTask>>,
}

/// Cloneable access to a bridge's task pool and worker progress.
#[derive(Clone)]
pub struct BridgeHandle {
    pool: SharedPool,
    progress: Arc<Progress>,
}

impl BridgeHandle {
    /// Register a task of device `source_id`.
    pub fn add_task(&self, source_id: &str, task: Arc<dyn BridgeTask>) -> TaskId {
        self.pool.lock().add_source(source_id).add(task)
    }

    pub fn remove_task(&self, source_id: &str, id: TaskId) -> bool {
        self.pool
            .lock()
            .source_mut(source_id)
            .and_then(|pool| pool.remove(id))
            .is_some()
    }

    /// Drop all tasks of a device, e.g. when it is removed at runtime.
    pub fn remove_source(&self, source_id: &str) -> bool {
        self.pool.lock().remove_source(source_id).is_some()
    }

    /// Make ONCE tasks of every device deliverable again.
    pub fn reset_once(&self) {
        self.pool.lock().reset_once();
    }

    /// Block until every dispatched batch has been executed, or `timeout`.
    /// Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.progress.counts.lock();
        while counts.completed < counts.dispatched {
            if self
                .progress
                .idle
                .wait_until(&mut counts, deadline)
                .timed_out()
            {
                return counts.completed >= counts.dispatched;
            }
        }
        true
    }

    /// Tasks that returned an error or panicked so far.
    pub fn failed_tasks(&self) -> u64 {
        self.progress.counts.lock().failed
    }
}

impl fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("pool", &*self.pool.lock())
            .field("progress", &*self.progress.counts.lock())
            .finish()
    }
}

/// Bridge executing simulated device tasks on a background thread.
pub struct SimulatedBridge {
    id: String,
    handle: BridgeHandle,
    sender: Option<Sender<Batch>>,
    worker: Option<JoinHandle<()>>,
    skipped: u64,
}

impl SimulatedBridge {
    /// Spawn the worker. After each batch it services up to `idle_tasks`
    /// extra tasks in round-robin order.
    pub fn spawn(id: impl Into<String>, idle_tasks: usize) -> Result<Self, BridgeError> {
        let id = id.into();
        let handle = BridgeHandle {
            pool: Arc::new(Mutex::new(MetaTaskPool::new())),
            progress: Arc::new(Progress::default()),
        };
        let (sender, receiver) = mpsc::channel();
        let worker_handle = handle.clone();
        let worker_id = id.clone();
        let worker = thread::Builder::new()
            .name(format!("bridge-{id}"))
            .spawn(move || worker_loop(&worker_id, receiver, worker_handle, idle_tasks))
            .map_err(|e| BridgeError::Communication {
                task: id.clone(),
                reason: format!("cannot spawn worker: {e}"),
            })?;
        info!(bridge = %id, idle_tasks, "bridge worker started");
        Ok(Self {
            id,
            handle,
            sender: Some(sender),
            worker: Some(worker),
            skipped: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Ticks whose selection was skipped because the worker was still busy.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn dispatch(&mut self, ctx: &CycleContext) -> Result<(), BridgeError> {
        {
            let counts = self.handle.progress.counts.lock();
            if counts.completed < counts.dispatched {
                drop(counts);
                self.skipped += 1;
                if self.skipped <= 10 || self.skipped % 1000 == 0 {
                    warn!(bridge = %self.id, skipped = self.skipped, "worker busy, skipping tick");
                }
                return Ok(());
            }
        }

        let tasks = self.handle.pool.lock().select_for_this_tick();
        if tasks.is_empty() {
            return Ok(());
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BridgeError::WorkerStopped(self.id.clone()))?;

        self.handle.progress.counts.lock().dispatched += 1;
        let batch = Batch {
            cycle: ctx.cycle,
            now: ctx.now,
            tasks,
        };
        sender.send(batch).map_err(|_| {
            self.handle.progress.counts.lock().dispatched -= 1;
            BridgeError::WorkerStopped(self.id.clone())
        })
    }
}

impl PhaseListener for SimulatedBridge {
    fn name(&self) -> &str {
        &self.id
    }

    fn phases(&self) -> PhaseMask {
        PhaseMask::EXECUTE_WRITE
    }

    fn on_phase(&mut self, phase: Phase, ctx: &CycleContext) -> Result<(), PhaseError> {
        if phase == Phase::ExecuteWrite {
            self.dispatch(ctx)?;
        }
        Ok(())
    }
}

impl Drop for SimulatedBridge {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(bridge = %self.id, "bridge worker panicked");
            }
        }
        debug!(bridge = %self.id, "bridge worker stopped");
    }
}

impl fmt::Debug for SimulatedBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedBridge")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("skipped", &self.skipped)
            .finish()
    }
}

fn worker_loop(id: &str, batches: Receiver<Batch>, handle: BridgeHandle, idle_tasks: usize) {
    while let Ok(batch) = batches.recv() {
        let mut failed = 0;
        for task in &batch.tasks {
            failed += u64::from(!execute(id, task.as_ref(), batch.now));
        }
        for _ in 0..idle_tasks {
            let Some(task) = handle.pool.lock().select_one() else {
                break;
            };
            failed += u64::from(!execute(id, task.as_ref(), batch.now));
        }

        let mut counts = handle.progress.counts.lock();
        counts.completed += 1;
        counts.failed += failed;
        drop(counts);
        handle.progress.idle.notify_all();
        debug!(bridge = id, cycle = batch.cycle, tasks = batch.tasks.len(), failed, "batch executed");
    }
}

/// Run one task, containing errors and panics. Returns `true` on success.
fn execute(bridge: &str, task: &dyn BridgeTask, now: Instant) -> bool {
    match catch_unwind(AssertUnwindSafe(|| task.execute(now))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(bridge, task = task.name(), error = %e, "bridge task failed");
            false
        }
        Err(_) => {
            error!(bridge, task = task.name(), "bridge task panicked");
            false
        }
    }
}
