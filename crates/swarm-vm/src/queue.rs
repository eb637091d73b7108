//! Cooperative job queue with a worker-thread pool.
//!
//! `PushCall*` builds a job — the call plus a clone of the pushing VM — and
//! enqueues it pinned to the current queue context. Workers pop jobs and
//! execute them in their cloned VMs, recording the result (or error) against
//! the job's context. `Drain` blocks until the pinned context has no
//! outstanding jobs and then hands back its return map; job failures
//! surface there as `QueueExecution` errors.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use swarm_isa::{FunctionReference, Reference};

use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeExCode, VmError};
use crate::vm::VirtualMachine;

pub type JobId = u64;
pub type ContextId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Complete,
    Error,
}

/// A queued function call: the (possibly partially-applied) function value
/// and the final argument, if any.
#[derive(Debug, Clone)]
pub struct QueuedCall {
    pub func: FunctionReference,
    pub arg: Option<Reference>,
}

pub struct Job {
    pub id: JobId,
    pub context: ContextId,
    pub call: QueuedCall,
    pub vm: VirtualMachine,
}

#[derive(Default)]
pub struct QueueState {
    pending: Mutex<VecDeque<Job>>,
    outstanding: Mutex<HashMap<ContextId, usize>>,
    results: Mutex<HashMap<ContextId, HashMap<JobId, Reference>>>,
    errors: Mutex<HashMap<ContextId, Vec<(JobId, RuntimeError)>>>,
    states: Mutex<HashMap<JobId, JobState>>,
    next_job: AtomicU64,
    shutdown: AtomicBool,
}

impl QueueState {
    pub fn new() -> Arc<QueueState> {
        Arc::new(QueueState::default())
    }

    /// Enqueue a call pinned to `context`, executing in `vm`.
    pub fn push(&self, context: ContextId, call: QueuedCall, vm: VirtualMachine) -> JobId {
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            context: context.clone(),
            call,
            vm,
        };
        *self
            .outstanding
            .lock()
            .expect("queue mutex poisoned")
            .entry(context)
            .or_insert(0) += 1;
        self.states
            .lock()
            .expect("queue mutex poisoned")
            .insert(id, JobState::Pending);
        self.pending
            .lock()
            .expect("queue mutex poisoned")
            .push_back(job);
        id
    }

    pub fn pop(&self) -> Option<Job> {
        let job = self.pending.lock().expect("queue mutex poisoned").pop_front();
        if let Some(job) = &job {
            self.states
                .lock()
                .expect("queue mutex poisoned")
                .insert(job.id, JobState::Running);
        }
        job
    }

    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.states
            .lock()
            .expect("queue mutex poisoned")
            .get(&id)
            .copied()
    }

    /// Pushed-but-unfinished jobs across every context.
    pub fn total_outstanding(&self) -> usize {
        self.outstanding
            .lock()
            .expect("queue mutex poisoned")
            .values()
            .sum()
    }

    /// The first recorded failure of any context, if one exists.
    pub fn take_any_error(&self) -> Option<(JobId, RuntimeError)> {
        let mut errors = self.errors.lock().expect("queue mutex poisoned");
        for list in errors.values_mut() {
            if !list.is_empty() {
                return Some(list.remove(0));
            }
        }
        None
    }

    /// Jobs of `context` that have been pushed but not finished.
    pub fn outstanding(&self, context: &str) -> usize {
        self.outstanding
            .lock()
            .expect("queue mutex poisoned")
            .get(context)
            .copied()
            .unwrap_or(0)
    }

    /// Record a finished job.
    pub fn complete(
        &self,
        id: JobId,
        context: &str,
        outcome: Result<Option<Reference>, VmError>,
    ) {
        match outcome {
            Ok(result) => {
                if let Some(value) = result {
                    self.results
                        .lock()
                        .expect("queue mutex poisoned")
                        .entry(context.to_string())
                        .or_default()
                        .insert(id, value);
                }
                self.states
                    .lock()
                    .expect("queue mutex poisoned")
                    .insert(id, JobState::Complete);
            }
            Err(e) => {
                error!("job {id} failed: {e}");
                let cause = match e {
                    VmError::Runtime(r) => r,
                    other => RuntimeError::new(
                        RuntimeExCode::InvalidReferenceImplementation,
                        other.to_string(),
                    ),
                };
                self.errors
                    .lock()
                    .expect("queue mutex poisoned")
                    .entry(context.to_string())
                    .or_default()
                    .push((id, cause));
                self.states
                    .lock()
                    .expect("queue mutex poisoned")
                    .insert(id, JobState::Error);
            }
        }
        if let Some(n) = self
            .outstanding
            .lock()
            .expect("queue mutex poisoned")
            .get_mut(context)
        {
            *n = n.saturating_sub(1);
        }
    }

    /// Completed results of a context, keyed by job id.
    pub fn take_results(&self, context: &str) -> HashMap<JobId, Reference> {
        self.results
            .lock()
            .expect("queue mutex poisoned")
            .remove(context)
            .unwrap_or_default()
    }

    /// The first recorded failure of a context, if any.
    pub fn take_error(&self, context: &str) -> Option<(JobId, RuntimeError)> {
        let mut errors = self.errors.lock().expect("queue mutex poisoned");
        let list = errors.get_mut(context)?;
        if list.is_empty() {
            return None;
        }
        Some(list.remove(0))
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Runs one popped job to completion in its cloned VM.
pub fn run_job(state: &QueueState, mut job: Job) {
    debug!("running job {} (context {})", job.id, job.context);
    let outcome = job.vm.execute_queued_call(&job.call);
    state.complete(job.id, &job.context, outcome);
}

/// Owns the worker threads; dropping it signals shutdown and joins them.
pub struct WorkerPool {
    state: Arc<QueueState>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(state: Arc<QueueState>, config: &VmConfig) -> WorkerPool {
        debug!("starting {} worker threads", config.max_threads);
        let handles = (0..config.max_threads)
            .map(|_| {
                let state = Arc::clone(&state);
                let sleep_us = config.queue_sleep_us;
                thread::spawn(move || worker_loop(state, sleep_us))
            })
            .collect();
        WorkerPool { state, handles }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.state.signal_shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(state: Arc<QueueState>, sleep_us: u64) {
    debug!("started worker thread");
    loop {
        match state.pop() {
            Some(job) => run_job(&state, job),
            None => {
                if state.is_shutdown() {
                    break;
                }
            }
        }
        thread::sleep(Duration::from_micros(sleep_us));
    }
}
