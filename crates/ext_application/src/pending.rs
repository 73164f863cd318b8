//! Answers parked until a platform callback arrives: app control replies
//! keyed by [`ReplyKey`], and kill requests keyed by process id.

use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

use crate::adapter::Answer;
use crate::error::ApplicationError;
use crate::types::{AppControlReply, ApplicationControlData};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opaque key of a pending reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyKey(u64);

struct Registry<T> {
    closed: bool,
    answers: HashMap<ReplyKey, Arc<Answer<T>>>,
}

/// Answers waiting for a reply. Each registration leaves exactly once,
/// through [`take`](Self::take) or [`cancel_all`](Self::cancel_all).
pub struct PendingReplies<T> {
    next: AtomicU64,
    registry: Mutex<Registry<T>>,
}

impl<T: Send + 'static> Default for PendingReplies<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> PendingReplies<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            registry: Mutex::new(Registry {
                closed: false,
                answers: HashMap::new(),
            }),
        }
    }

    /// Park `answer`; `None` once the registry has been closed
    pub fn register(&self, answer: Arc<Answer<T>>) -> Option<ReplyKey> {
        let mut registry = lock(&self.registry);
        if registry.closed {
            return None;
        }
        let key = ReplyKey(self.next.fetch_add(1, Ordering::Relaxed));
        registry.answers.insert(key, answer);
        Some(key)
    }

    pub fn take(&self, key: ReplyKey) -> Option<Arc<Answer<T>>> {
        lock(&self.registry).answers.remove(&key)
    }

    /// Close the registry and cancel every parked answer
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut registry = lock(&self.registry);
            registry.closed = true;
            registry.answers.drain().map(|(_, answer)| answer).collect()
        };
        for answer in &drained {
            answer.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ReplyRegistry = PendingReplies<Vec<ApplicationControlData>>;

/// Handle the platform uses to deliver one app control reply
#[derive(Debug, Clone)]
pub struct ReplyToken {
    registry: Weak<ReplyRegistry>,
    key: ReplyKey,
}

impl ReplyToken {
    pub fn new(registry: &Arc<ReplyRegistry>, key: ReplyKey) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            key,
        }
    }

    pub fn key(&self) -> ReplyKey {
        self.key
    }

    /// Complete the waiting answer. Failed and canceled replies surface as
    /// not-found. Returns false if nobody is waiting any more.
    pub fn deliver(self, reply: AppControlReply) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            debug!(key = self.key.0, "reply arrived after shutdown");
            return false;
        };
        let Some(answer) = registry.take(self.key) else {
            debug!(key = self.key.0, "reply for unknown or finished request");
            return false;
        };

        let result = match reply {
            AppControlReply::Succeeded(data) => Ok(data),
            AppControlReply::Failed => Err(ApplicationError::not_found(
                "launched application replied with failure",
            )),
            AppControlReply::Canceled => Err(ApplicationError::not_found(
                "launched application canceled the request",
            )),
        };
        answer.complete(result)
    }
}

impl<T> std::fmt::Debug for PendingReplies<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReplies").finish_non_exhaustive()
    }
}

struct KillWatch {
    answer: Arc<Answer<()>>,
    /// Dropping it stops the liveness fallback timer
    timer: Option<Sender<()>>,
}

#[derive(Default)]
struct KillRegistry {
    closed: bool,
    watches: HashMap<i32, KillWatch>,
}

/// Kill requests waiting for their termination event, keyed by pid
#[derive(Default)]
pub struct KillWatches {
    registry: Mutex<KillRegistry>,
}

impl KillWatches {
    pub fn insert(&self, pid: i32, answer: Arc<Answer<()>>) -> Result<(), ApplicationError> {
        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(ApplicationError::unknown("application manager is shutting down"));
        }
        if registry.watches.contains_key(&pid) {
            return Err(ApplicationError::unknown(format!(
                "kill request already pending for {}",
                pid
            )));
        }
        registry
            .watches
            .insert(pid, KillWatch { answer, timer: None });
        Ok(())
    }

    /// Attach the fallback timer's cancel handle; false if the watch is
    /// already gone (the process ended during the terminate call)
    pub fn arm_timer(&self, pid: i32, cancel: Sender<()>) -> bool {
        match lock(&self.registry).watches.get_mut(&pid) {
            Some(watch) => {
                watch.timer = Some(cancel);
                true
            }
            None => false,
        }
    }

    pub fn take(&self, pid: i32) -> Option<Arc<Answer<()>>> {
        lock(&self.registry)
            .watches
            .remove(&pid)
            .map(|watch| watch.answer)
    }

    pub fn contains(&self, pid: i32) -> bool {
        lock(&self.registry).watches.contains_key(&pid)
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut registry = lock(&self.registry);
            registry.closed = true;
            registry.watches.drain().map(|(_, watch)| watch).collect()
        };
        for watch in &drained {
            watch.answer.cancel();
        }
        drained.len()
    }
}

/// Handle the platform uses to report that a process terminated
#[derive(Clone)]
pub struct TerminationNotifier {
    watches: Weak<KillWatches>,
}

impl TerminationNotifier {
    pub fn new(watches: &Arc<KillWatches>) -> Self {
        Self {
            watches: Arc::downgrade(watches),
        }
    }

    pub fn notify(&self, pid: i32) -> bool {
        let Some(watches) = self.watches.upgrade() else {
            return false;
        };
        match watches.take(pid) {
            Some(answer) => {
                debug!(pid, "termination event received");
                answer.complete(Ok(()))
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for TerminationNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationNotifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_reply_delivered_once() {
        let registry = Arc::new(ReplyRegistry::new());
        let (answer, rx) = Answer::channel();
        let key = registry.register(answer).unwrap();
        let token = ReplyToken::new(&registry, key);

        let data = vec![ApplicationControlData::new("k", vec!["v".into()])];
        assert!(token.clone().deliver(AppControlReply::Succeeded(data.clone())));
        assert!(!token.deliver(AppControlReply::Failed));
        assert!(registry.is_empty());
        assert_eq!(rx.await.unwrap().unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_and_canceled_replies_are_not_found() {
        let registry = Arc::new(ReplyRegistry::new());
        for reply in [AppControlReply::Failed, AppControlReply::Canceled] {
            let (answer, rx) = Answer::channel();
            let key = registry.register(answer).unwrap();
            assert!(ReplyToken::new(&registry, key).deliver(reply));
            assert_eq!(rx.await.unwrap().unwrap_err().kind(), ErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn test_cancel_all_closes_registry() {
        let registry = Arc::new(ReplyRegistry::new());
        let (answer, rx) = Answer::channel();
        let key = registry.register(answer).unwrap();

        assert_eq!(registry.cancel_all(), 1);
        assert!(rx.await.is_err());
        assert!(!ReplyToken::new(&registry, key).deliver(AppControlReply::Failed));

        let (late, _rx) = Answer::channel();
        assert!(registry.register(late).is_none());
    }

    #[test]
    fn test_token_outlives_registry() {
        let registry = Arc::new(ReplyRegistry::new());
        let (answer, _rx) = Answer::channel();
        let key = registry.register(answer).unwrap();
        let token = ReplyToken::new(&registry, key);
        drop(registry);
        assert!(!token.deliver(AppControlReply::Canceled));
    }

    #[tokio::test]
    async fn test_termination_notifier() {
        let watches = Arc::new(KillWatches::default());
        let (answer, rx) = Answer::channel();
        watches.insert(42, answer).unwrap();

        let (again, _rx) = Answer::channel();
        assert!(watches.insert(42, again).is_err());

        let notifier = TerminationNotifier::new(&watches);
        assert!(notifier.notify(42));
        assert!(!notifier.notify(42));
        assert!(rx.await.unwrap().is_ok());
        assert!(!watches.contains(42));
    }

    #[test]
    fn test_arm_timer_after_event() {
        let watches = Arc::new(KillWatches::default());
        let (answer, _rx) = Answer::channel();
        watches.insert(7, answer).unwrap();
        TerminationNotifier::new(&watches).notify(7);

        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(!watches.arm_timer(7, tx));
        // The sender was dropped with the rejected arm
        assert!(rx.recv().is_err());
    }
}
