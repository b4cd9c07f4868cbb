//! Single-shot background execution of one pipe call.
//!
//! # Design
//! A `BackgroundOperation` wraps one operation and runs it at most once until
//! `reset`. The `Idle -> Running` decision is taken under the state mutex, so
//! concurrent `start` calls can never launch two workers. The operation runs
//! on tokio's blocking pool; its outcome is cached and delivered on the
//! dispatcher runtime to whichever callback is current when it completes.
//! Later `start` calls replay the cached outcome instead of running again,
//! which is what keeps a restarted caller from repeating a save or remove.
//!
//! Errors are shared as `Arc<E>`, so every redelivery hands out the very same
//! error value.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::error::PipeError;
use crate::pipe::{PipeHandler, ReadFilter};

/// What an operation produced: its value, or the error it failed with.
pub type Outcome<T, E> = std::result::Result<T, Arc<E>>;

/// Receives the outcome of a background operation.
pub type Callback<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send + 'static>;

/// Observable lifecycle of a `BackgroundOperation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Finished,
}

enum Slot<T, E> {
    Idle,
    Running,
    Finished(Outcome<T, E>),
}

struct Shared<T, E> {
    slot: Slot<T, E>,
    callback: Option<Callback<T, E>>,
    /// Bumped by `reset` so a worker launched before it cannot publish.
    generation: u64,
    /// A worker is executing the operation, possibly for an older generation.
    in_flight: bool,
}

type Operation<T, E> = Arc<dyn Fn() -> Result<T, E> + Send + Sync>;

pub struct BackgroundOperation<T, E = PipeError> {
    shared: Arc<Mutex<Shared<T, E>>>,
    operation: Operation<T, E>,
    dispatcher: Handle,
}

impl<T, E> Clone for BackgroundOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            operation: Arc::clone(&self.operation),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T, E> BackgroundOperation<T, E>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    /// Wraps `operation`; outcomes are delivered on `dispatcher`.
    pub fn new<F>(dispatcher: Handle, operation: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                slot: Slot::Idle,
                callback: None,
                generation: 0,
                in_flight: false,
            })),
            operation: Arc::new(operation),
            dispatcher,
        }
    }

    pub fn state(&self) -> TaskState {
        match self.shared.lock().slot {
            Slot::Idle => TaskState::Idle,
            Slot::Running => TaskState::Running,
            Slot::Finished(_) => TaskState::Finished,
        }
    }

    /// Requests the outcome.
    ///
    /// Runs the operation only when idle. While it runs, `callback` replaces
    /// the previously registered one; once finished, the cached outcome is
    /// delivered again. Delivery is always asynchronous.
    ///
    /// If the operation panics nothing is delivered: the callback is dropped
    /// and the operation goes back to `Idle`, so a caller awaiting a channel
    /// fed by the callback sees it closed.
    pub fn start<C>(&self, callback: C)
    where
        C: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        let mut shared = self.shared.lock();
        if let Slot::Finished(outcome) = &shared.slot {
            let outcome = outcome.clone();
            drop(shared);
            debug!("operation already finished, redelivering cached outcome");
            self.dispatcher.spawn(async move { callback(outcome) });
            return;
        }

        shared.callback = Some(Box::new(callback));
        if matches!(shared.slot, Slot::Running) {
            debug!("operation in flight, callback replaced");
            return;
        }

        shared.slot = Slot::Running;
        let generation = shared.generation;
        if shared.in_flight {
            // The worker from before the last reset relaunches on completion.
            debug!(generation, "waiting for stale worker to finish");
            return;
        }
        shared.in_flight = true;
        drop(shared);
        debug!(generation, "starting background operation");
        Self::launch(
            Arc::clone(&self.shared),
            Arc::clone(&self.operation),
            self.dispatcher.clone(),
            generation,
        );
    }

    /// Forgets the cached outcome so the next `start` runs the operation
    /// again. An in-flight run finishes but its outcome is dropped, and a
    /// `start` issued meanwhile only runs once it has finished.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        shared.slot = Slot::Idle;
        shared.callback = None;
        shared.generation = shared.generation.wrapping_add(1);
        debug!(generation = shared.generation, "background operation reset");
    }

    /// Drops the registered callback. A running operation still completes
    /// and its outcome is cached for the next `start`.
    pub fn cancel(&self) {
        self.shared.lock().callback = None;
    }

    fn launch(
        shared: Arc<Mutex<Shared<T, E>>>,
        operation: Operation<T, E>,
        dispatcher: Handle,
        generation: u64,
    ) {
        let next_dispatcher = dispatcher.clone();
        dispatcher.spawn(async move {
            let worker = Arc::clone(&operation);
            let joined = tokio::task::spawn_blocking(move || worker()).await;

            let mut guard = shared.lock();
            guard.in_flight = false;
            if guard.generation != generation {
                debug!(generation, "outcome discarded after reset");
                // Running under a newer generation means a start is queued.
                if matches!(guard.slot, Slot::Running) {
                    guard.in_flight = true;
                    let current = guard.generation;
                    drop(guard);
                    debug!(generation = current, "starting queued background operation");
                    Self::launch(shared, operation, next_dispatcher, current);
                }
                return;
            }

            let outcome = match joined {
                Ok(result) => result.map_err(Arc::new),
                Err(err) => {
                    error!(error = %err, "background operation panicked");
                    guard.slot = Slot::Idle;
                    guard.callback = None;
                    return;
                }
            };
            guard.slot = Slot::Finished(outcome.clone());
            let callback = guard.callback.take();
            drop(guard);

            match callback {
                Some(callback) => callback(outcome),
                None => debug!("no callback registered, outcome cached"),
            }
        });
    }
}

/// Reads through `pipe` in the background.
pub fn read_operation<T>(
    dispatcher: Handle,
    pipe: Arc<dyn PipeHandler<T>>,
    filter: Option<ReadFilter>,
) -> BackgroundOperation<Vec<T>>
where
    T: Clone + Send + 'static,
{
    BackgroundOperation::new(dispatcher, move || pipe.on_read(filter.as_ref()))
}

/// Saves `item` through `pipe` in the background.
pub fn save_operation<T>(
    dispatcher: Handle,
    pipe: Arc<dyn PipeHandler<T>>,
    item: T,
) -> BackgroundOperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    BackgroundOperation::new(dispatcher, move || pipe.on_save(&item))
}

/// Removes the record `id` through `pipe` in the background.
pub fn remove_operation<T>(
    dispatcher: Handle,
    pipe: Arc<dyn PipeHandler<T>>,
    id: String,
) -> BackgroundOperation<()>
where
    T: 'static,
{
    BackgroundOperation::new(dispatcher, move || pipe.on_remove(&id))
}
