//! Request/answer plumbing between the script thread and the platform worker.
//!
//! Callers submit a handler to a [`RequestQueue`] and get a
//! `oneshot::Receiver` back at once. The handler runs on the queue's worker
//! thread and either answers directly or parks its [`Answer`] somewhere a
//! platform callback will find it and completes it later.

use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::ApplicationError;

pub type Reply<T> = Result<T, ApplicationError>;

const PENDING: u8 = 0;
const ANSWERED: u8 = 1;
const CANCELLED: u8 = 2;

/// Completion handle of one request. Completes at most once.
#[derive(Debug)]
pub struct Answer<T> {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Reply<T>>>>,
}

impl<T: Send + 'static> Answer<T> {
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<Reply<T>>) {
        let (tx, rx) = oneshot::channel();
        let answer = Arc::new(Self {
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(tx)),
        });
        (answer, rx)
    }

    /// Deliver `result`. Returns false if the answer was already completed
    /// or cancelled. A caller that stopped waiting is not an error.
    pub fn complete(&self, result: Reply<T>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, ANSWERED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            if sender.send(result).is_err() {
                debug!("caller went away before the answer arrived");
            }
        }
        true
    }

    /// Drop the answer without a result; the receiver observes a closed channel
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

/// What a handler did with its request
#[derive(Debug)]
pub enum Disposition<T> {
    /// Complete now with this result
    Answer(Reply<T>),
    /// The answer was handed off and will be completed later
    Manual,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread draining an unbounded FIFO of requests
pub struct RequestQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl RequestQueue {
    pub fn new(thread_name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                debug!("request queue drained");
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue `handler` and return the receiver for its answer.
    ///
    /// Never blocks. A panicking handler answers with an unknown error.
    pub fn submit<T, F>(&self, handler: F) -> oneshot::Receiver<Reply<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<Answer<T>>) -> Disposition<T> + Send + 'static,
    {
        let (answer, receiver) = Answer::channel();
        let job_answer = answer.clone();

        let job: Job = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(|| handler(&job_answer))) {
                Ok(Disposition::Answer(result)) => {
                    job_answer.complete(result);
                }
                Ok(Disposition::Manual) => {
                    debug!("request switched to manual answer");
                }
                Err(_) => {
                    error!("request handler panicked");
                    job_answer.complete(Err(ApplicationError::unknown("request handler panicked")));
                }
            }
        });

        let sent = match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            answer.complete(Err(ApplicationError::unknown("request queue is closed")));
        }

        receiver
    }

    /// Stop accepting requests and wait for the queued ones to finish
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("request worker panicked");
            }
        }
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
