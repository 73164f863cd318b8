//! `ApplicationManager`: launching, killing and querying applications.
//!
//! Asynchronous operations are queued on one worker thread and answered
//! through `oneshot` receivers; the synchronous ones run on the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::adapter::{Answer, Disposition, Reply, RequestQueue};
use crate::cache::PackageCache;
use crate::config::{ApplicationConfig, RetryPolicy};
use crate::error::ApplicationError;
use crate::pending::{KillWatches, ReplyRegistry, ReplyToken, TerminationNotifier};
use crate::platform::{
    AppControlError, AppManagerError, AppManagerPlatform, AppRecord, AulError, PackageEvent,
    PackageInfoPlatform, PackageRecord,
};
use crate::types::{
    AppControlReply, AppInfoEvent, ApplicationCertificate, ApplicationContext,
    ApplicationControl, ApplicationControlData, ApplicationInformation, ApplicationMetaData,
    CurrentApplication, FoundApps, RequestedApplicationControl,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `attempt` up to `policy.attempts()` times, sleeping between tries
/// while `retryable` accepts the error
fn with_retry<T, E: std::fmt::Display>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: impl FnMut() -> Result<T, E>,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let attempts = policy.attempts();
    let mut tries = 1;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if tries < attempts && retryable(&e) => {
                warn!(operation, attempt = tries, error = %e, "platform call failed, retrying");
                thread::sleep(policy.backoff());
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn parse_context_id(context_id: &str) -> Option<i32> {
    context_id.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Receivers for a launched app control
#[derive(Debug)]
pub struct LaunchAppControlHandle {
    pub launched: oneshot::Receiver<Reply<()>>,
    /// Present when a reply was requested. Closes without a value if the
    /// request failed or the manager shut down first.
    pub reply: Option<oneshot::Receiver<Reply<Vec<ApplicationControlData>>>>,
}

#[derive(Default)]
struct AppInfoListeners {
    next_watch_id: u64,
    sinks: HashMap<u64, mpsc::UnboundedSender<AppInfoEvent>>,
    platform_registered: bool,
}

pub(crate) struct ManagerInner {
    config: ApplicationConfig,
    apps: Arc<dyn AppManagerPlatform>,
    packages: Arc<dyn PackageInfoPlatform>,
    replies: Arc<ReplyRegistry>,
    kill_watches: Arc<KillWatches>,
    cache: PackageCache,
    listeners: Mutex<AppInfoListeners>,
}

/// Handle the platform uses to report package changes
#[derive(Clone)]
pub struct PackageEventNotifier {
    manager: Weak<ManagerInner>,
}

impl PackageEventNotifier {
    pub fn notify(&self, event: PackageEvent) {
        match self.manager.upgrade() {
            Some(manager) => manager.on_package_event(event),
            None => debug!(?event, "package event after shutdown"),
        }
    }
}

impl std::fmt::Debug for PackageEventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageEventNotifier").finish_non_exhaustive()
    }
}

pub struct ApplicationManager {
    inner: Arc<ManagerInner>,
    queue: RequestQueue,
}

impl ApplicationManager {
    pub fn new(
        config: ApplicationConfig,
        apps: Arc<dyn AppManagerPlatform>,
        packages: Arc<dyn PackageInfoPlatform>,
    ) -> std::io::Result<Self> {
        let queue = RequestQueue::new(&config.worker_thread_name)?;
        info!(worker = %config.worker_thread_name, "application manager started");
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                apps,
                packages,
                replies: Arc::new(ReplyRegistry::new()),
                kill_watches: Arc::new(KillWatches::default()),
                cache: PackageCache::default(),
                listeners: Mutex::new(AppInfoListeners::default()),
            }),
            queue,
        })
    }

    fn submit<T, F>(&self, handler: F) -> oneshot::Receiver<Reply<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<ManagerInner>, &Arc<Answer<T>>) -> Disposition<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.queue.submit(move |answer| handler(&inner, answer))
    }

    // ------------------------------------------------------------------
    // Asynchronous operations
    // ------------------------------------------------------------------

    pub fn launch(&self, app_id: impl Into<String>) -> oneshot::Receiver<Reply<()>> {
        let app_id = app_id.into();
        self.submit(move |inner, _| Disposition::Answer(inner.launch(&app_id)))
    }

    pub fn kill(&self, context_id: impl Into<String>) -> oneshot::Receiver<Reply<()>> {
        let context_id = context_id.into();
        self.submit(move |inner, answer| inner.kill(&context_id, answer))
    }

    pub fn launch_app_control(
        &self,
        control: ApplicationControl,
        app_id: Option<String>,
        want_reply: bool,
    ) -> LaunchAppControlHandle {
        let (reply_answer, reply) = if want_reply {
            let (answer, rx) = Answer::channel();
            (Some(answer), Some(rx))
        } else {
            (None, None)
        };

        let launched = self.submit(move |inner, _| {
            Disposition::Answer(inner.launch_app_control(&control, app_id.as_deref(), reply_answer))
        });

        LaunchAppControlHandle { launched, reply }
    }

    pub fn find_app_control(&self, control: ApplicationControl) -> oneshot::Receiver<Reply<FoundApps>> {
        self.submit(move |inner, _| Disposition::Answer(inner.find_app_control(control)))
    }

    pub fn get_apps_context(&self) -> oneshot::Receiver<Reply<Vec<ApplicationContext>>> {
        self.submit(|inner, _| Disposition::Answer(inner.apps_context()))
    }

    pub fn get_apps_info(&self) -> oneshot::Receiver<Reply<Vec<ApplicationInformation>>> {
        self.submit(|inner, _| Disposition::Answer(inner.apps_info()))
    }

    /// Subscribe `sink` to installed-application changes; answers the watch id
    pub fn add_app_info_event_listener(
        &self,
        sink: mpsc::UnboundedSender<AppInfoEvent>,
    ) -> oneshot::Receiver<Reply<u64>> {
        self.submit(move |inner, _| Disposition::Answer(inner.add_listener(sink)))
    }

    pub fn remove_app_info_event_listener(&self, watch_id: u64) -> oneshot::Receiver<Reply<()>> {
        self.submit(move |inner, _| Disposition::Answer(inner.remove_listener(watch_id)))
    }

    // ------------------------------------------------------------------
    // Synchronous operations
    // ------------------------------------------------------------------

    pub fn get_current_application(&self) -> Reply<CurrentApplication> {
        let inner = &self.inner;
        let app_id = inner.own_app_id()?;
        let record = inner.packages.app_info(&app_id).map_err(|e| {
            warn!(app_id = %app_id, error = %e, "current application info unavailable");
            ApplicationError::unknown(e.to_string())
        })?;
        Ok(CurrentApplication {
            app_info: inner.information(record),
            context_id: inner.apps.own_pid().to_string(),
        })
    }

    /// Context of `context_id`, or of the current application when absent
    pub fn get_app_context(&self, context_id: Option<&str>) -> Reply<ApplicationContext> {
        let inner = &self.inner;
        let own_pid = inner.apps.own_pid();

        let pid = match context_id.filter(|id| !id.is_empty()) {
            None => own_pid,
            Some(id) => parse_context_id(id)
                .ok_or_else(|| ApplicationError::not_found("Given contextId is wrong"))?,
        };
        if pid == own_pid {
            return Ok(ApplicationContext::new(pid, inner.own_app_id()?));
        }

        match inner.apps.app_id_of_pid(pid) {
            Ok(app_id) => Ok(ApplicationContext::new(pid, app_id)),
            Err(e @ (AppManagerError::NoSuchApp | AppManagerError::InvalidParameter)) => {
                Err(ApplicationError::not_found(e.to_string()))
            }
            Err(e) => {
                warn!(pid, error = %e, "app_id_of_pid failed");
                Err(ApplicationError::unknown(e.to_string()))
            }
        }
    }

    pub fn get_app_info(&self, app_id: Option<&str>) -> Reply<ApplicationInformation> {
        let record = self.inner.app_record(app_id)?;
        Ok(self.inner.information(record))
    }

    /// Signing certificates of an application's package; rpm packages have none
    pub fn get_app_certs(&self, app_id: Option<&str>) -> Reply<Vec<ApplicationCertificate>> {
        let inner = &self.inner;
        let app_id = inner.app_id_or_own(app_id)?;
        let package_id = inner
            .package_of(&app_id)
            .ok_or_else(|| ApplicationError::not_found("Can not get package"))?;

        let package = match inner.cache.package(&package_id) {
            Some(package) => package,
            None => inner
                .packages
                .package(&package_id)
                .map_err(|e| ApplicationError::unknown(e.to_string()))?,
        };
        if package.is_rpm() {
            debug!(package_id = %package_id, "rpm package, no certificates");
            return Ok(Vec::new());
        }

        inner
            .packages
            .certificates(&package_id)
            .map_err(|e| ApplicationError::unknown(e.to_string()))
    }

    /// `file://<package root>/shared/`
    pub fn get_app_shared_uri(&self, app_id: Option<&str>) -> Reply<String> {
        let record = self.inner.app_record(app_id)?;
        let package = self
            .inner
            .packages
            .package(&record.package_id)
            .map_err(|e| ApplicationError::unknown(e.to_string()))?;
        Ok(format!("file://{}/shared/", package.root_path))
    }

    pub fn get_app_meta_data(&self, app_id: Option<&str>) -> Reply<Vec<ApplicationMetaData>> {
        let record = self.inner.app_record(app_id)?;
        self.inner
            .packages
            .metadata(&record.app_id)
            .map_err(|e| ApplicationError::unknown(e.to_string()))
    }

    /// Installed size in bytes, queried on demand
    pub fn get_install_size(&self, app_id: Option<&str>) -> Reply<u64> {
        let record = self.inner.app_record(app_id)?;
        self.inner
            .packages
            .install_size(&record.package_id)
            .map_err(|e| ApplicationError::unknown(e.to_string()))
    }

    pub fn exit(&self) -> Reply<()> {
        info!("current application exit requested");
        self.inner
            .apps
            .exit()
            .map_err(|e| ApplicationError::unknown(e.to_string()))
    }

    pub fn hide(&self) -> Reply<()> {
        self.inner
            .apps
            .hide()
            .map_err(|e| ApplicationError::unknown(e.to_string()))
    }

    pub fn get_requested_app_control(&self) -> Reply<RequestedApplicationControl> {
        match self.inner.apps.requested_app_control() {
            Ok(Some(requested)) => Ok(requested),
            Ok(None) => Err(ApplicationError::not_found(
                "application was not launched by an app control",
            )),
            Err(e) => Err(ApplicationError::unknown(e.to_string())),
        }
    }

    pub fn reply_result(
        &self,
        requested: &RequestedApplicationControl,
        data: Vec<ApplicationControlData>,
    ) -> Reply<()> {
        self.inner
            .reply_to_caller(requested, AppControlReply::Succeeded(data))
    }

    pub fn reply_failure(&self, requested: &RequestedApplicationControl) -> Reply<()> {
        self.inner.reply_to_caller(requested, AppControlReply::Failed)
    }

    pub fn pending_replies(&self) -> usize {
        self.inner.replies.len()
    }
}

impl Drop for ApplicationManager {
    fn drop(&mut self) {
        self.queue.shutdown();

        let replies = self.inner.replies.cancel_all();
        let kills = self.inner.kill_watches.cancel_all();

        let registered = {
            let mut listeners = lock(&self.inner.listeners);
            listeners.sinks.clear();
            std::mem::take(&mut listeners.platform_registered)
        };
        if registered {
            if let Err(e) = self.inner.packages.unregister_listener() {
                warn!(error = %e, "failed to unregister package listener");
            }
        }

        debug!(replies, kills, "application manager torn down");
    }
}

impl ManagerInner {
    fn own_app_id(&self) -> Reply<String> {
        self.apps.own_app_id().map_err(|e| {
            warn!(error = %e, "current application id unavailable");
            ApplicationError::unknown(e.to_string())
        })
    }

    fn app_id_or_own(&self, app_id: Option<&str>) -> Reply<String> {
        match app_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => self.own_app_id(),
        }
    }

    fn app_record(&self, app_id: Option<&str>) -> Reply<AppRecord> {
        let app_id = self.app_id_or_own(app_id)?;
        self.packages.app_info(&app_id).map_err(|e| {
            debug!(app_id = %app_id, error = %e, "app_info failed");
            ApplicationError::not_found(e.to_string())
        })
    }

    fn package_of(&self, app_id: &str) -> Option<String> {
        if let Some(package_id) = self.cache.package_of(app_id) {
            return Some(package_id);
        }
        match self.packages.app_info(app_id) {
            Ok(record) if !record.package_id.is_empty() => Some(record.package_id),
            Ok(_) => None,
            Err(e) => {
                debug!(app_id = %app_id, error = %e, "package lookup failed");
                None
            }
        }
    }

    fn package_record(&self, package_id: &str) -> Option<PackageRecord> {
        if package_id.is_empty() {
            return None;
        }
        if let Some(package) = self.cache.package(package_id) {
            return Some(package);
        }
        match self.packages.package(package_id) {
            Ok(package) => Some(package),
            Err(e) => {
                warn!(package_id = %package_id, error = %e, "package info unavailable");
                None
            }
        }
    }

    /// Combine an app record with its package's version and install time
    fn information(&self, record: AppRecord) -> ApplicationInformation {
        let package = self.package_record(&record.package_id);
        ApplicationInformation {
            id: record.app_id,
            name: record.name,
            icon_path: record.icon_path,
            version: package
                .as_ref()
                .map(|p| p.version.clone())
                .unwrap_or_default(),
            show: record.show,
            categories: record.categories,
            install_date: package
                .as_ref()
                .map(|p| p.installed_time.saturating_mul(1_000))
                .unwrap_or_default(),
            package_id: record.package_id,
        }
    }

    fn launch(&self, app_id: &str) -> Reply<()> {
        if app_id.is_empty() {
            return Err(ApplicationError::invalid_argument("App id is mandatory field."));
        }

        let result = with_retry(
            &self.config.launch_retry,
            "open_app",
            || self.apps.open_app(app_id),
            |_| true,
        );

        match result {
            Ok(pid) => {
                info!(app_id, pid, "application launched");
                Ok(())
            }
            Err(e @ (AulError::InvalidArgument | AulError::General)) => {
                error!(app_id, error = %e, "launch failed");
                Err(ApplicationError::not_found(e.to_string()))
            }
            Err(e @ AulError::Communication) => {
                error!(app_id, error = %e, "launch failed");
                Err(ApplicationError::platform(e.to_string()))
            }
            Err(e) => {
                error!(app_id, error = %e, "launch failed");
                Err(ApplicationError::unknown(e.to_string()))
            }
        }
    }

    fn kill(self: &Arc<Self>, context_id: &str, answer: &Arc<Answer<()>>) -> Disposition<()> {
        if context_id.is_empty() {
            return Disposition::Answer(Err(ApplicationError::invalid_argument(
                "Context id is mandatory",
            )));
        }
        let Some(pid) = parse_context_id(context_id) else {
            return Disposition::Answer(Err(ApplicationError::not_found(
                "Given context id is wrong",
            )));
        };
        if pid == self.apps.own_pid() {
            return Disposition::Answer(Err(ApplicationError::invalid_argument(
                "Cannot kill the current application",
            )));
        }

        let app_id = match self.apps.app_id_of_pid(pid) {
            Ok(app_id) => app_id,
            Err(e) => {
                debug!(pid, error = %e, "kill target not found");
                return Disposition::Answer(Err(ApplicationError::not_found(e.to_string())));
            }
        };

        if let Err(e) = self.kill_watches.insert(pid, answer.clone()) {
            return Disposition::Answer(Err(e));
        }

        let notifier = TerminationNotifier::new(&self.kill_watches);
        if let Err(e) = self.apps.terminate(pid, notifier) {
            warn!(pid, app_id = %app_id, error = %e, "terminate failed");
            self.kill_watches.take(pid);
            return Disposition::Answer(Err(ApplicationError::unknown(e.to_string())));
        }

        info!(pid, app_id = %app_id, "termination requested");
        self.arm_kill_timer(pid);
        Disposition::Manual
    }

    /// Check liveness ourselves if no termination event shows up in time
    fn arm_kill_timer(self: &Arc<Self>, pid: i32) {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        if !self.kill_watches.arm_timer(pid, cancel_tx) {
            return;
        }

        let timeout = self.config.kill_timeout();
        let manager = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name(format!("kill-watch-{}", pid))
            .spawn(move || {
                crossbeam_channel::select! {
                    recv(cancel_rx) -> _ => return,
                    recv(crossbeam_channel::after(timeout)) -> _ => {}
                }
                if let Some(manager) = manager.upgrade() {
                    manager.kill_fallback(pid);
                }
            });

        if let Err(e) = spawned {
            // Without a timer the request would wait forever on a lost event
            warn!(pid, error = %e, "could not start kill timer");
            self.kill_fallback(pid);
        }
    }

    fn kill_fallback(&self, pid: i32) {
        let Some(answer) = self.kill_watches.take(pid) else {
            return;
        };
        match self.apps.app_id_of_pid(pid) {
            Ok(app_id) => {
                warn!(pid, app_id = %app_id, "process still alive after termination request");
                answer.complete(Err(ApplicationError::platform(format!(
                    "{} ({}) did not terminate",
                    app_id, pid
                ))));
            }
            Err(_) => {
                debug!(pid, "no termination event, but the process is gone");
                answer.complete(Ok(()));
            }
        }
    }

    fn launch_app_control(
        &self,
        control: &ApplicationControl,
        app_id: Option<&str>,
        reply_answer: Option<Arc<Answer<Vec<ApplicationControlData>>>>,
    ) -> Reply<()> {
        if let Err(e) = control.validate() {
            if let Some(answer) = &reply_answer {
                answer.cancel();
            }
            return Err(e);
        }

        let app_id = app_id.filter(|id| !id.is_empty());
        if let Some(id) = app_id {
            let resolved = self.apps.resolve_alias(id);
            if !self.apps.app_exists(&resolved) {
                if let Some(answer) = &reply_answer {
                    answer.cancel();
                }
                return Err(ApplicationError::not_found(format!(
                    "application {} does not exist",
                    id
                )));
            }
        }

        let token = match reply_answer {
            Some(answer) => match self.replies.register(answer.clone()) {
                Some(key) => Some(ReplyToken::new(&self.replies, key)),
                None => {
                    answer.cancel();
                    return Err(ApplicationError::unknown(
                        "application manager is shutting down",
                    ));
                }
            },
            None => None,
        };

        let result = with_retry(
            &self.config.launch_retry,
            "send_launch_request",
            || self.apps.send_launch_request(control, app_id, token.clone()),
            |e| *e == AppControlError::LaunchRejected,
        );

        let Err(e) = result else {
            info!(operation = %control.operation, app_id = ?app_id, "launch request sent");
            return Ok(());
        };

        warn!(operation = %control.operation, error = %e, "launch request failed");
        if let Some(token) = token {
            if let Some(answer) = self.replies.take(token.key()) {
                answer.cancel();
            }
        }

        Err(match e {
            AppControlError::InvalidParameter => ApplicationError::invalid_argument(e.to_string()),
            AppControlError::OutOfMemory | AppControlError::LaunchRejected => {
                ApplicationError::platform(e.to_string())
            }
            AppControlError::AppNotFound => ApplicationError::not_found(e.to_string()),
            AppControlError::PermissionDenied => ApplicationError::security(e.to_string()),
            _ => ApplicationError::unknown(e.to_string()),
        })
    }

    fn find_app_control(&self, control: ApplicationControl) -> Reply<FoundApps> {
        control.validate()?;
        let app_ids = self.apps.matching_apps(&control).map_err(|e| {
            warn!(operation = %control.operation, error = %e, "matching_apps failed");
            ApplicationError::platform(e.to_string())
        })?;

        let apps = app_ids
            .iter()
            .filter_map(|id| match self.packages.app_info(id) {
                Ok(record) => Some(self.information(record)),
                Err(e) => {
                    warn!(app_id = %id, error = %e, "skipping matched app without info");
                    None
                }
            })
            .collect();

        Ok(FoundApps {
            apps,
            app_control: control,
        })
    }

    fn apps_context(&self) -> Reply<Vec<ApplicationContext>> {
        self.apps.running_contexts().map_err(|e| {
            warn!(error = %e, "running_contexts failed");
            ApplicationError::platform(e.to_string())
        })
    }

    fn apps_info(&self) -> Reply<Vec<ApplicationInformation>> {
        let packages = self.packages.packages().map_err(|e| {
            warn!(error = %e, "package listing failed");
            ApplicationError::platform(e.to_string())
        })?;
        let apps = self.packages.installed_apps().map_err(|e| {
            warn!(error = %e, "installed app listing failed");
            ApplicationError::platform(e.to_string())
        })?;

        self.cache.populate(&packages, &apps);
        Ok(apps.into_iter().map(|a| self.information(a)).collect())
    }

    fn add_listener(self: &Arc<Self>, sink: mpsc::UnboundedSender<AppInfoEvent>) -> Reply<u64> {
        let needs_platform = !lock(&self.listeners).platform_registered;
        if needs_platform {
            let notifier = PackageEventNotifier {
                manager: Arc::downgrade(self),
            };
            self.packages.register_listener(notifier).map_err(|e| {
                warn!(error = %e, "package listener registration failed");
                ApplicationError::platform(e.to_string())
            })?;
            debug!("package listener registered");
        }

        let mut listeners = lock(&self.listeners);
        listeners.platform_registered = true;
        listeners.next_watch_id += 1;
        let watch_id = listeners.next_watch_id;
        listeners.sinks.insert(watch_id, sink);
        debug!(watch_id, "app info listener added");
        Ok(watch_id)
    }

    fn remove_listener(&self, watch_id: u64) -> Reply<()> {
        let unregister = {
            let mut listeners = lock(&self.listeners);
            if listeners.sinks.remove(&watch_id).is_none() {
                return Err(ApplicationError::not_found(format!(
                    "No watchId : {}",
                    watch_id
                )));
            }
            debug!(watch_id, "app info listener removed");
            if listeners.sinks.is_empty() && listeners.platform_registered {
                listeners.platform_registered = false;
                true
            } else {
                false
            }
        };

        if unregister {
            self.packages.unregister_listener().map_err(|e| {
                warn!(error = %e, "package listener unregistration failed");
                ApplicationError::platform(e.to_string())
            })?;
            debug!("package listener unregistered");
        }
        Ok(())
    }

    fn on_package_event(&self, event: PackageEvent) {
        let app_id = event.app_id().to_string();
        self.cache.invalidate_app(&app_id);

        let info_event = match event {
            PackageEvent::Installed { app_id } => match self.packages.app_info(&app_id) {
                Ok(record) => AppInfoEvent::Installed {
                    info: self.information(record),
                },
                Err(e) => {
                    warn!(app_id = %app_id, error = %e, "installed app has no info");
                    return;
                }
            },
            PackageEvent::Updated { app_id } => match self.packages.app_info(&app_id) {
                Ok(record) => AppInfoEvent::Updated {
                    info: self.information(record),
                },
                Err(e) => {
                    warn!(app_id = %app_id, error = %e, "updated app has no info");
                    return;
                }
            },
            PackageEvent::Uninstalled { app_id } => AppInfoEvent::Uninstalled { app_id },
        };

        let listeners = lock(&self.listeners);
        for (watch_id, sink) in &listeners.sinks {
            if sink.send(info_event.clone()).is_err() {
                debug!(watch_id, "app info listener receiver gone");
            }
        }
        debug!(app_id = %app_id, listeners = listeners.sinks.len(), "package event dispatched");
    }

    fn reply_to_caller(
        &self,
        requested: &RequestedApplicationControl,
        reply: AppControlReply,
    ) -> Reply<()> {
        if requested.caller_app_id.is_empty() {
            return Err(ApplicationError::not_found("Cannot find caller"));
        }
        match self.apps.is_running(&requested.caller_app_id) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ApplicationError::not_found(format!(
                    "caller {} is not running",
                    requested.caller_app_id
                )))
            }
            Err(e) => return Err(ApplicationError::not_found(e.to_string())),
        }

        self.apps
            .reply_to_launch_request(requested.request_id, &reply)
            .map_err(|e| {
                warn!(caller = %requested.caller_app_id, error = %e, "reply failed");
                ApplicationError::not_found(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::simulated::{app, package, SimulatedPlatform, TerminateBehavior};
    use crate::types::APP_CONTROL_OPERATION_VIEW;

    fn fast_config() -> ApplicationConfig {
        ApplicationConfig {
            launch_retry: RetryPolicy {
                attempts: 3,
                backoff_ms: 1,
            },
            kill_timeout_ms: 50,
            worker_thread_name: "application-test".into(),
        }
    }

    fn setup() -> (Arc<SimulatedPlatform>, ApplicationManager) {
        let sim = Arc::new(SimulatedPlatform::with_demo_apps());
        let manager = ApplicationManager::new(fast_config(), sim.clone(), sim.clone()).unwrap();
        (sim, manager)
    }

    fn kind<T: std::fmt::Debug>(result: Reply<T>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[tokio::test]
    async fn test_launch_retries_then_succeeds() {
        let (sim, manager) = setup();
        sim.fail_open([AulError::Timeout, AulError::Communication]);

        manager.launch("org.tizen.gallery").await.unwrap().unwrap();
        assert_eq!(sim.open_calls(), 3);
    }

    #[tokio::test]
    async fn test_launch_first_attempt_and_exhausted_einval() {
        let (sim, manager) = setup();
        manager.launch("org.tizen.browser").await.unwrap().unwrap();
        assert_eq!(sim.open_calls(), 1);

        sim.fail_open([AulError::InvalidArgument; 3]);
        assert_eq!(
            kind(manager.launch("org.tizen.browser").await.unwrap()),
            ErrorKind::NotFound
        );
        assert_eq!(sim.open_calls(), 4);
    }

    #[tokio::test]
    async fn test_launch_error_mapping() {
        let (sim, manager) = setup();
        assert_eq!(kind(manager.launch("").await.unwrap()), ErrorKind::InvalidArgument);
        assert_eq!(sim.open_calls(), 0);

        assert_eq!(
            kind(manager.launch("org.example.missing").await.unwrap()),
            ErrorKind::NotFound
        );

        sim.fail_open([AulError::Communication; 3]);
        assert_eq!(
            kind(manager.launch("org.tizen.gallery").await.unwrap()),
            ErrorKind::Platform
        );

        sim.fail_open([AulError::IllegalAccess; 3]);
        assert_eq!(
            kind(manager.launch("org.tizen.gallery").await.unwrap()),
            ErrorKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_kill_with_termination_event() {
        let (sim, manager) = setup();
        let pid = sim.spawn("org.tizen.gallery");

        manager.kill(pid.to_string()).await.unwrap().unwrap();
        assert!(sim.app_id_of_pid(pid).is_err());
    }

    #[tokio::test]
    async fn test_kill_fallback_checks_liveness() {
        let (sim, manager) = setup();

        sim.set_terminate_behavior(TerminateBehavior::Silent);
        let pid = sim.spawn("org.tizen.gallery");
        manager.kill(pid.to_string()).await.unwrap().unwrap();

        sim.set_terminate_behavior(TerminateBehavior::Survive);
        let pid = sim.spawn("org.tizen.browser");
        assert_eq!(
            kind(manager.kill(pid.to_string()).await.unwrap()),
            ErrorKind::Platform
        );
    }

    #[tokio::test]
    async fn test_kill_rejects_bad_targets() {
        let (_sim, manager) = setup();
        assert_eq!(kind(manager.kill("").await.unwrap()), ErrorKind::InvalidArgument);
        assert_eq!(kind(manager.kill("abc").await.unwrap()), ErrorKind::NotFound);
        assert_eq!(kind(manager.kill("-4").await.unwrap()), ErrorKind::NotFound);
        assert_eq!(kind(manager.kill("4242").await.unwrap()), ErrorKind::NotFound);
        assert_eq!(
            kind(manager.kill("1000").await.unwrap()),
            ErrorKind::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_app_control_reply_delivered() {
        let (sim, manager) = setup();
        let data = vec![ApplicationControlData::new("result", vec!["ok".into()])];
        sim.set_auto_reply(Some(AppControlReply::Succeeded(data.clone())));

        let control = ApplicationControl::new(APP_CONTROL_OPERATION_VIEW).with_uri("file:///a.jpg");
        let handle = manager.launch_app_control(control, None, true);
        handle.launched.await.unwrap().unwrap();
        assert_eq!(handle.reply.unwrap().await.unwrap().unwrap(), data);
        assert_eq!(manager.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_app_control_parked_reply_and_shutdown() {
        let (sim, manager) = setup();
        let control = ApplicationControl::new("http://tizen.org/appcontrol/operation/pick");
        let handle = manager.launch_app_control(control, Some("com.samsung.settings".into()), true);
        handle.launched.await.unwrap().unwrap();
        assert_eq!(manager.pending_replies(), 1);

        let tokens = sim.take_parked_replies();
        drop(manager);
        // Cancelled on teardown: the reply never arrives
        assert!(handle.reply.unwrap().await.is_err());
        assert!(!tokens[0].clone().deliver(AppControlReply::Canceled));
    }

    #[tokio::test]
    async fn test_app_control_failures() {
        let (sim, manager) = setup();

        let handle = manager.launch_app_control(
            ApplicationControl::new(APP_CONTROL_OPERATION_VIEW),
            None,
            true,
        );
        assert_eq!(kind(handle.launched.await.unwrap()), ErrorKind::InvalidArgument);
        assert!(handle.reply.unwrap().await.is_err());

        let handle = manager.launch_app_control(
            ApplicationControl::new("op"),
            Some("org.example.missing".into()),
            false,
        );
        assert_eq!(kind(handle.launched.await.unwrap()), ErrorKind::NotFound);

        sim.fail_launch_request([AppControlError::PermissionDenied]);
        let handle = manager.launch_app_control(
            ApplicationControl::new("op"),
            Some("org.tizen.gallery".into()),
            true,
        );
        assert_eq!(kind(handle.launched.await.unwrap()), ErrorKind::Security);
        assert!(handle.reply.unwrap().await.is_err());
        assert_eq!(manager.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_app_control_retries_only_rejections() {
        let (sim, manager) = setup();
        sim.fail_launch_request([AppControlError::LaunchRejected, AppControlError::LaunchRejected]);
        let handle =
            manager.launch_app_control(ApplicationControl::new("op"), Some("org.tizen.gallery".into()), false);
        handle.launched.await.unwrap().unwrap();
        assert_eq!(sim.launch_calls(), 3);

        sim.fail_launch_request([AppControlError::TimedOut]);
        let handle =
            manager.launch_app_control(ApplicationControl::new("op"), Some("org.tizen.gallery".into()), false);
        assert_eq!(kind(handle.launched.await.unwrap()), ErrorKind::Unknown);
        assert_eq!(sim.launch_calls(), 4);
    }

    #[tokio::test]
    async fn test_find_app_control() {
        let (_sim, manager) = setup();
        let control = ApplicationControl::new(APP_CONTROL_OPERATION_VIEW).with_uri("https://tizen.org");
        let found = manager.find_app_control(control.clone()).await.unwrap().unwrap();
        let ids: Vec<_> = found.apps.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["org.tizen.gallery", "org.tizen.browser"]);
        assert_eq!(found.app_control, control);
    }

    #[tokio::test]
    async fn test_apps_info_and_context() {
        let (sim, manager) = setup();
        let infos = manager.get_apps_info().await.unwrap().unwrap();
        assert_eq!(infos.len(), 4);
        let gallery = infos.iter().find(|i| i.id == "org.tizen.gallery").unwrap();
        assert_eq!(gallery.version, "1.4.0");
        assert_eq!(gallery.install_date, 1_700_000_000_000);

        let contexts = manager.get_apps_context().await.unwrap().unwrap();
        assert_eq!(contexts, vec![ApplicationContext::new(1000, "org.tizen.example.host")]);

        sim.fail_packages(Some(crate::platform::PackageInfoError::Io));
        assert_eq!(kind(manager.get_apps_info().await.unwrap()), ErrorKind::Platform);
        sim.fail_running_contexts(Some(AppManagerError::Io));
        assert_eq!(kind(manager.get_apps_context().await.unwrap()), ErrorKind::Platform);
    }

    #[tokio::test]
    async fn test_app_info_listeners() {
        let (sim, manager) = setup();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let first = manager.add_app_info_event_listener(tx1).await.unwrap().unwrap();
        let second = manager.add_app_info_event_listener(tx2).await.unwrap().unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(sim.has_package_listener());

        sim.install(
            app("org.example.new", "New", "org.example.new"),
            package("org.example.new", "0.1.0", "tpk"),
        );
        assert!(sim.emit_package_event(PackageEvent::Installed {
            app_id: "org.example.new".into()
        }));
        match rx1.recv().await.unwrap() {
            AppInfoEvent::Installed { info } => assert_eq!(info.version, "0.1.0"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx2.recv().await, Some(AppInfoEvent::Installed { .. })));

        manager.remove_app_info_event_listener(first).await.unwrap().unwrap();
        assert!(sim.has_package_listener());
        sim.uninstall("org.example.new");
        sim.emit_package_event(PackageEvent::Uninstalled {
            app_id: "org.example.new".into(),
        });
        assert_eq!(
            rx2.recv().await,
            Some(AppInfoEvent::Uninstalled {
                app_id: "org.example.new".into()
            })
        );

        manager.remove_app_info_event_listener(second).await.unwrap().unwrap();
        assert!(!sim.has_package_listener());
        assert_eq!(
            kind(manager.remove_app_info_event_listener(second).await.unwrap()),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_current_application_and_context() {
        let (sim, manager) = setup();
        let current = manager.get_current_application().unwrap();
        assert_eq!(current.app_info.id, "org.tizen.example.host");
        assert_eq!(current.context_id, "1000");

        assert_eq!(manager.get_app_context(None).unwrap().app_id, "org.tizen.example.host");
        let pid = sim.spawn("org.tizen.gallery");
        let context = manager.get_app_context(Some(&pid.to_string())).unwrap();
        assert_eq!(context.app_id, "org.tizen.gallery");

        assert_eq!(kind(manager.get_app_context(Some("0"))), ErrorKind::NotFound);
        assert_eq!(kind(manager.get_app_context(Some("9999"))), ErrorKind::NotFound);
    }

    #[test]
    fn test_app_details() {
        let (_sim, manager) = setup();
        assert_eq!(manager.get_app_info(None).unwrap().name, "Host");
        assert_eq!(kind(manager.get_app_info(Some("nope"))), ErrorKind::NotFound);

        assert_eq!(manager.get_app_certs(None).unwrap().len(), 2);
        assert!(manager.get_app_certs(Some("org.tizen.settings")).unwrap().is_empty());
        assert_eq!(kind(manager.get_app_certs(Some("nope"))), ErrorKind::NotFound);

        assert_eq!(
            manager.get_app_shared_uri(None).unwrap(),
            "file:///opt/usr/globalapps/org.tizen.example/shared/"
        );
        assert_eq!(manager.get_app_meta_data(None).unwrap()[0].value, "media");
        assert_eq!(manager.get_install_size(None).unwrap(), 1_572_864);
    }

    #[test]
    fn test_reply_to_caller() {
        let (sim, manager) = setup();
        assert_eq!(kind(manager.get_requested_app_control()), ErrorKind::NotFound);

        let requested = RequestedApplicationControl {
            app_control: ApplicationControl::new("http://tizen.org/appcontrol/operation/pick"),
            caller_app_id: "org.tizen.gallery".into(),
            request_id: 77,
        };
        sim.set_requested_app_control(Some(requested.clone()));
        assert_eq!(manager.get_requested_app_control().unwrap(), requested);

        // Caller not running yet
        assert_eq!(kind(manager.reply_failure(&requested)), ErrorKind::NotFound);

        sim.spawn("org.tizen.gallery");
        let data = vec![ApplicationControlData::new("picked", vec!["a".into()])];
        manager.reply_result(&requested, data.clone()).unwrap();
        assert_eq!(sim.sent_replies(), vec![(77, AppControlReply::Succeeded(data))]);

        let orphan = RequestedApplicationControl {
            caller_app_id: String::new(),
            ..requested
        };
        assert_eq!(kind(manager.reply_failure(&orphan)), ErrorKind::NotFound);
    }

    #[test]
    fn test_exit_and_hide() {
        let (sim, manager) = setup();
        manager.hide().unwrap();
        manager.exit().unwrap();
        assert!(sim.is_hidden() && sim.is_exited());
    }
}
