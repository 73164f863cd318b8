//! Application management extension for the Tizen host runtime.
//!
//! Provides `tizen.application`: launching and killing applications, app
//! controls with replies, installed-application queries and change events.
//! The platform sits behind [`AppManagerPlatform`] and [`PackageInfoPlatform`].

use deno_core::{op2, Extension, OpState};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod pending;
pub mod platform;
pub mod simulated;
pub mod types;

pub use adapter::Reply;
pub use config::{ApplicationConfig, RetryPolicy};
pub use error::{ApplicationError, ApplicationErrorCode, ErrorKind};
pub use manager::{ApplicationManager, LaunchAppControlHandle, PackageEventNotifier};
pub use platform::{AppManagerPlatform, PackageEvent, PackageInfoPlatform};
pub use simulated::{SimulatedPlatform, TerminateBehavior};
pub use types::*;

// ============================================================================
// Capability Checker
// ============================================================================

/// Trait for checking application management permissions
pub trait ApplicationCapabilityChecker: Send + Sync + 'static {
    /// Check if launching `app_id` is allowed; empty for implicit app controls
    fn can_launch(&self, _app_id: &str) -> bool {
        true
    }

    /// Check if terminating other applications is allowed
    fn can_kill(&self) -> bool {
        true
    }

    /// Check if reading signing certificates is allowed
    fn can_read_certificates(&self) -> bool {
        true
    }

    /// Check if listing installed and running applications is allowed
    fn can_query_apps(&self) -> bool {
        true
    }
}

/// Default capability checker that allows all operations
pub struct DefaultApplicationCapabilityChecker;

impl ApplicationCapabilityChecker for DefaultApplicationCapabilityChecker {}

fn check(
    state: &OpState,
    allowed: impl FnOnce(&dyn ApplicationCapabilityChecker) -> bool,
    what: &str,
) -> Result<(), ApplicationError> {
    let checker = state.borrow::<Box<dyn ApplicationCapabilityChecker>>();
    if allowed(checker.as_ref()) {
        Ok(())
    } else {
        Err(ApplicationError::security(format!("{} is not allowed", what)))
    }
}

// ============================================================================
// State
// ============================================================================

struct EventSlot {
    receiver: Option<mpsc::UnboundedReceiver<AppInfoEvent>>,
}

type ReplyReceiver = oneshot::Receiver<Reply<Vec<ApplicationControlData>>>;

pub struct ApplicationState {
    pub manager: Arc<ApplicationManager>,
    next_reply_id: u64,
    replies: HashMap<u64, ReplyReceiver>,
    watchers: HashMap<u64, EventSlot>,
}

impl ApplicationState {
    pub fn new(manager: Arc<ApplicationManager>) -> Self {
        Self {
            manager,
            next_reply_id: 1,
            replies: HashMap::new(),
            watchers: HashMap::new(),
        }
    }
}

/// Initialize application state in OpState - must be called after creating JsRuntime
pub fn init_application_state<C: ApplicationCapabilityChecker>(
    op_state: &mut OpState,
    manager: Arc<ApplicationManager>,
    checker: Option<C>,
) {
    op_state.put::<ApplicationState>(ApplicationState::new(manager));

    let checker: Box<dyn ApplicationCapabilityChecker> = match checker {
        Some(c) => Box::new(c),
        None => Box::new(DefaultApplicationCapabilityChecker),
    };
    op_state.put(checker);
}

fn manager(state: &OpState) -> Arc<ApplicationManager> {
    state.borrow::<ApplicationState>().manager.clone()
}

async fn answered<T>(receiver: oneshot::Receiver<Reply<T>>) -> Result<T, ApplicationError> {
    receiver
        .await
        .map_err(|_| ApplicationError::unknown("application manager is shutting down"))?
}

// ============================================================================
// Asynchronous operations
// ============================================================================

#[op2(async)]
async fn op_application_launch(
    state: Rc<RefCell<OpState>>,
    #[string] app_id: String,
) -> Result<(), ApplicationError> {
    let receiver = {
        let state = state.borrow();
        check(&state, |c| c.can_launch(&app_id), "Launching this application")?;
        manager(&state).launch(app_id)
    };
    answered(receiver).await
}

#[op2(async)]
async fn op_application_kill(
    state: Rc<RefCell<OpState>>,
    #[string] context_id: String,
) -> Result<(), ApplicationError> {
    let receiver = {
        let state = state.borrow();
        check(&state, |c| c.can_kill(), "Killing applications")?;
        manager(&state).kill(context_id)
    };
    answered(receiver).await
}

/// Send an app control. When a reply is wanted, returns the id to pass to
/// `op_application_app_control_reply`.
#[op2(async)]
#[serde]
async fn op_application_launch_app_control(
    state: Rc<RefCell<OpState>>,
    #[serde] control: ApplicationControl,
    #[string] app_id: Option<String>,
    want_reply: bool,
) -> Result<Option<u64>, ApplicationError> {
    let handle = {
        let state = state.borrow();
        let target = app_id.as_deref().unwrap_or_default();
        check(&state, |c| c.can_launch(target), "Launching this application")?;
        manager(&state).launch_app_control(control, app_id, want_reply)
    };

    answered(handle.launched).await?;

    let Some(reply) = handle.reply else {
        return Ok(None);
    };
    let mut state = state.borrow_mut();
    let app_state = state.borrow_mut::<ApplicationState>();
    let id = app_state.next_reply_id;
    app_state.next_reply_id += 1;
    app_state.replies.insert(id, reply);
    Ok(Some(id))
}

/// Wait for the launched application's reply. `None` when no reply will
/// come (unknown id, or the request was dropped).
#[op2(async)]
#[serde]
async fn op_application_app_control_reply(
    state: Rc<RefCell<OpState>>,
    #[serde] id: u64,
) -> Result<Option<Vec<ApplicationControlData>>, ApplicationError> {
    let receiver = {
        let mut state = state.borrow_mut();
        state.borrow_mut::<ApplicationState>().replies.remove(&id)
    };
    let Some(receiver) = receiver else {
        return Ok(None);
    };
    match receiver.await {
        Ok(reply) => reply.map(Some),
        Err(_) => {
            debug!(id, "app control reply dropped");
            Ok(None)
        }
    }
}

#[op2(async)]
#[serde]
async fn op_application_find_app_control(
    state: Rc<RefCell<OpState>>,
    #[serde] control: ApplicationControl,
) -> Result<FoundApps, ApplicationError> {
    let receiver = {
        let state = state.borrow();
        check(&state, |c| c.can_query_apps(), "Querying applications")?;
        manager(&state).find_app_control(control)
    };
    answered(receiver).await
}

#[op2(async)]
#[serde]
async fn op_application_get_apps_context(
    state: Rc<RefCell<OpState>>,
) -> Result<Vec<ApplicationContext>, ApplicationError> {
    let receiver = {
        let state = state.borrow();
        check(&state, |c| c.can_query_apps(), "Querying applications")?;
        manager(&state).get_apps_context()
    };
    answered(receiver).await
}

#[op2(async)]
#[serde]
async fn op_application_get_apps_info(
    state: Rc<RefCell<OpState>>,
) -> Result<Vec<ApplicationInformation>, ApplicationError> {
    let receiver = {
        let state = state.borrow();
        check(&state, |c| c.can_query_apps(), "Querying applications")?;
        manager(&state).get_apps_info()
    };
    answered(receiver).await
}

#[op2(async)]
#[bigint]
async fn op_application_add_app_info_event_listener(
    state: Rc<RefCell<OpState>>,
) -> Result<u64, ApplicationError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let receiver = manager(&state.borrow()).add_app_info_event_listener(tx);
    let watch_id = answered(receiver).await?;

    let mut state = state.borrow_mut();
    state
        .borrow_mut::<ApplicationState>()
        .watchers
        .insert(watch_id, EventSlot { receiver: Some(rx) });
    Ok(watch_id)
}

/// Next installed-application event; `None` once the listener is removed
#[op2(async)]
#[serde]
async fn op_application_app_info_event_next(
    state: Rc<RefCell<OpState>>,
    #[bigint] watch_id: u64,
) -> Result<Option<AppInfoEvent>, ApplicationError> {
    let mut rx = {
        let mut s = state.borrow_mut();
        let app_state = s.borrow_mut::<ApplicationState>();
        let Some(slot) = app_state.watchers.get_mut(&watch_id) else {
            return Ok(None);
        };
        slot.receiver
            .take()
            .ok_or_else(|| ApplicationError::unknown("Listener is already being polled"))?
    };

    let event = rx.recv().await;

    {
        let mut s = state.borrow_mut();
        let app_state = s.borrow_mut::<ApplicationState>();
        if let Some(slot) = app_state.watchers.get_mut(&watch_id) {
            slot.receiver = Some(rx);
        }
    }

    Ok(event)
}

#[op2(async)]
async fn op_application_remove_app_info_event_listener(
    state: Rc<RefCell<OpState>>,
    #[bigint] watch_id: u64,
) -> Result<(), ApplicationError> {
    let receiver = manager(&state.borrow()).remove_app_info_event_listener(watch_id);
    answered(receiver).await?;
    state
        .borrow_mut()
        .borrow_mut::<ApplicationState>()
        .watchers
        .remove(&watch_id);
    Ok(())
}

// ============================================================================
// Synchronous operations
// ============================================================================

#[op2]
#[serde]
fn op_application_get_current_application(
    state: &mut OpState,
) -> Result<CurrentApplication, ApplicationError> {
    manager(state).get_current_application()
}

#[op2]
#[serde]
fn op_application_get_app_context(
    state: &mut OpState,
    #[string] context_id: Option<String>,
) -> Result<ApplicationContext, ApplicationError> {
    manager(state).get_app_context(context_id.as_deref())
}

#[op2]
#[serde]
fn op_application_get_app_info(
    state: &mut OpState,
    #[string] app_id: Option<String>,
) -> Result<ApplicationInformation, ApplicationError> {
    manager(state).get_app_info(app_id.as_deref())
}

#[op2]
#[serde]
fn op_application_get_app_certs(
    state: &mut OpState,
    #[string] app_id: Option<String>,
) -> Result<Vec<ApplicationCertificate>, ApplicationError> {
    check(state, |c| c.can_read_certificates(), "Reading certificates")?;
    manager(state).get_app_certs(app_id.as_deref())
}

#[op2]
#[string]
fn op_application_get_app_shared_uri(
    state: &mut OpState,
    #[string] app_id: Option<String>,
) -> Result<String, ApplicationError> {
    manager(state).get_app_shared_uri(app_id.as_deref())
}

#[op2]
#[serde]
fn op_application_get_app_meta_data(
    state: &mut OpState,
    #[string] app_id: Option<String>,
) -> Result<Vec<ApplicationMetaData>, ApplicationError> {
    manager(state).get_app_meta_data(app_id.as_deref())
}

/// Installed size in bytes, as a JS number
#[op2]
fn op_application_get_install_size(
    state: &mut OpState,
    #[string] app_id: Option<String>,
) -> Result<f64, ApplicationError> {
    let bytes = manager(state).get_install_size(app_id.as_deref())?;
    Ok(bytes as f64)
}

#[op2(fast)]
fn op_application_exit(state: &mut OpState) -> Result<(), ApplicationError> {
    info!("Application exit requested");
    manager(state).exit()
}

#[op2(fast)]
fn op_application_hide(state: &mut OpState) -> Result<(), ApplicationError> {
    manager(state).hide()
}

#[op2]
#[serde]
fn op_application_get_requested_app_control(
    state: &mut OpState,
) -> Result<RequestedApplicationControl, ApplicationError> {
    manager(state).get_requested_app_control()
}

#[op2]
fn op_application_reply_result(
    state: &mut OpState,
    #[serde] requested: RequestedApplicationControl,
    #[serde] data: Vec<ApplicationControlData>,
) -> Result<(), ApplicationError> {
    manager(state).reply_result(&requested, data)
}

#[op2]
fn op_application_reply_failure(
    state: &mut OpState,
    #[serde] requested: RequestedApplicationControl,
) -> Result<(), ApplicationError> {
    manager(state).reply_failure(&requested)
}

// Include generated extension! macro from build.rs
include!(concat!(env!("OUT_DIR"), "/extension.rs"));

pub fn application_extension() -> Extension {
    tizen_application::ext()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LockedDown;

    impl ApplicationCapabilityChecker for LockedDown {
        fn can_launch(&self, app_id: &str) -> bool {
            app_id.starts_with("org.tizen.")
        }

        fn can_kill(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_default_capability_checker() {
        let checker = DefaultApplicationCapabilityChecker;
        assert!(checker.can_launch("org.example.any"));
        assert!(checker.can_launch(""));
        assert!(checker.can_kill());
        assert!(checker.can_read_certificates());
        assert!(checker.can_query_apps());
    }

    #[test]
    fn test_partial_checker_keeps_defaults() {
        let checker = LockedDown;
        assert!(checker.can_launch("org.tizen.gallery"));
        assert!(!checker.can_launch("com.example.other"));
        assert!(!checker.can_kill());
        assert!(checker.can_query_apps());
    }

    #[tokio::test]
    async fn test_answered_maps_dropped_request() {
        let (tx, rx) = oneshot::channel::<Reply<u32>>();
        drop(tx);
        let err = answered(rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);

        let (tx, rx) = oneshot::channel::<Reply<u32>>();
        tx.send(Err(ApplicationError::not_found("gone"))).unwrap();
        assert_eq!(answered(rx).await.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
