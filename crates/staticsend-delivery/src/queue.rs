//! Bounded FIFO job buffer shared by submitters and workers.
//!
//! Pushing never waits: a full or closed queue hands the job straight back.
//! Popping waits for a job and returns `None` only once the queue is closed
//! and empty, which is how workers learn to exit after draining.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use staticsend_core::DeliveryJob;
use tokio::sync::Notify;

/// Why a push was refused. Carries the job back to the caller.
#[derive(Debug)]
pub(crate) enum PushError {
    Full(DeliveryJob),
    Closed(DeliveryJob),
}

impl PushError {
    pub(crate) fn into_job(self) -> DeliveryJob {
        match self {
            Self::Full(job) | Self::Closed(job) => job,
        }
    }

    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::Full(_) => "delivery queue is full",
            Self::Closed(_) => "dispatcher is shutting down",
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<DeliveryJob>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: usize,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn try_push(&self, job: DeliveryJob) -> Result<(), PushError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PushError::Closed(job));
            }
            if state.jobs.len() >= self.capacity {
                return Err(PushError::Full(job));
            }
            state.jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    pub(crate) async fn pop(&self) -> Option<DeliveryJob> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a push or close between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(job) = state.jobs.pop_front() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting jobs. Buffered jobs stay poppable.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Removes every buffered job.
    pub(crate) fn drain(&self) -> Vec<DeliveryJob> {
        self.lock().jobs.drain(..).collect()
    }

    pub(crate) fn depth(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
