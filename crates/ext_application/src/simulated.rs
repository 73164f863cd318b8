//! In-memory platform used by the host on development machines and by tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::manager::PackageEventNotifier;
use crate::pending::{ReplyToken, TerminationNotifier};
use crate::platform::{
    AppControlError, AppManagerError, AppManagerPlatform, AppRecord, AulError, PackageEvent,
    PackageInfoError, PackageInfoPlatform, PackageRecord,
};
use crate::types::{
    AppControlReply, ApplicationCertificate, ApplicationContext, ApplicationControl,
    ApplicationMetaData, CertificateType, RequestedApplicationControl,
    APP_CONTROL_OPERATION_VIEW,
};

/// What happens to a process asked to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminateBehavior {
    /// Exits and reports it
    #[default]
    Notify,
    /// Exits without an event
    Silent,
    /// Keeps running
    Survive,
}

struct SimState {
    own_pid: i32,
    own_app_id: String,
    next_pid: i32,
    apps: BTreeMap<String, AppRecord>,
    packages: BTreeMap<String, PackageRecord>,
    certificates: HashMap<String, Vec<ApplicationCertificate>>,
    metadata: HashMap<String, Vec<ApplicationMetaData>>,
    install_sizes: HashMap<String, u64>,
    aliases: HashMap<String, String>,
    handlers: HashMap<String, Vec<String>>,
    running: BTreeMap<i32, String>,

    open_failures: VecDeque<AulError>,
    launch_failures: VecDeque<AppControlError>,
    contexts_failure: Option<AppManagerError>,
    packages_failure: Option<PackageInfoError>,
    terminate: TerminateBehavior,

    auto_reply: Option<AppControlReply>,
    parked_replies: Vec<ReplyToken>,
    requested: Option<RequestedApplicationControl>,
    sent_replies: Vec<(u64, AppControlReply)>,
    listener: Option<PackageEventNotifier>,

    open_calls: usize,
    launch_calls: usize,
    exited: bool,
    hidden: bool,
}

/// Implements both platform traits over plain maps.
///
/// Failures can be scripted per call. Callbacks into the manager are never
/// made while the internal lock is held.
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl SimulatedPlatform {
    pub fn new(own_app_id: impl Into<String>, own_pid: i32) -> Self {
        let own_app_id = own_app_id.into();
        let mut running = BTreeMap::new();
        running.insert(own_pid, own_app_id.clone());
        Self {
            state: Mutex::new(SimState {
                own_pid,
                own_app_id,
                next_pid: own_pid + 1,
                apps: BTreeMap::new(),
                packages: BTreeMap::new(),
                certificates: HashMap::new(),
                metadata: HashMap::new(),
                install_sizes: HashMap::new(),
                aliases: HashMap::new(),
                handlers: HashMap::new(),
                running,
                open_failures: VecDeque::new(),
                launch_failures: VecDeque::new(),
                contexts_failure: None,
                packages_failure: None,
                terminate: TerminateBehavior::default(),
                auto_reply: None,
                parked_replies: Vec::new(),
                requested: None,
                sent_replies: Vec::new(),
                listener: None,
                open_calls: 0,
                launch_calls: 0,
                exited: false,
                hidden: false,
            }),
        }
    }

    /// A host application plus a handful of installed ones
    pub fn with_demo_apps() -> Self {
        Self::demo("org.tizen.example.host", 1000)
    }

    /// Demo applications installed next to `own_app_id`, which runs as `own_pid`
    pub fn demo(own_app_id: &str, own_pid: i32) -> Self {
        let sim = Self::new(own_app_id, own_pid);
        sim.install(
            app(own_app_id, "Host", "org.tizen.example"),
            package("org.tizen.example", "1.0.0", "tpk"),
        );
        sim.install(
            app("org.tizen.settings", "Settings", "org.tizen.settings"),
            package("org.tizen.settings", "2.1.3", "rpm"),
        );
        sim.install(
            app("org.tizen.gallery", "Gallery", "org.tizen.gallery"),
            package("org.tizen.gallery", "1.4.0", "tpk"),
        );
        sim.install(
            app("org.tizen.browser", "Internet", "org.tizen.browser"),
            package("org.tizen.browser", "5.0.1", "rpm"),
        );
        sim.add_handler(APP_CONTROL_OPERATION_VIEW, "org.tizen.gallery");
        sim.add_handler(APP_CONTROL_OPERATION_VIEW, "org.tizen.browser");
        sim.add_alias("com.samsung.settings", "org.tizen.settings");
        sim.set_certificates(
            "org.tizen.example",
            vec![
                ApplicationCertificate {
                    kind: CertificateType::AuthorSigner,
                    value: "MIICnjCCAYYCCQDAuthorSigner".into(),
                },
                ApplicationCertificate {
                    kind: CertificateType::DistributorRoot,
                    value: "MIIClDCCAfugAwDistributorRoot".into(),
                },
            ],
        );
        sim.set_metadata(
            own_app_id,
            vec![ApplicationMetaData {
                key: "http://tizen.org/metadata/background-category".into(),
                value: "media".into(),
            }],
        );
        sim.set_install_size("org.tizen.example", 1_572_864);
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn install(&self, app: AppRecord, package: PackageRecord) {
        let mut state = self.state();
        state.packages.insert(package.package_id.clone(), package);
        state.apps.insert(app.app_id.clone(), app);
    }

    pub fn uninstall(&self, app_id: &str) {
        let mut state = self.state();
        if let Some(record) = state.apps.remove(app_id) {
            state.packages.remove(&record.package_id);
        }
    }

    pub fn add_alias(&self, alias: &str, app_id: &str) {
        self.state().aliases.insert(alias.into(), app_id.into());
    }

    /// Register `app_id` as able to handle `operation`
    pub fn add_handler(&self, operation: &str, app_id: &str) {
        self.state()
            .handlers
            .entry(operation.into())
            .or_default()
            .push(app_id.into());
    }

    pub fn set_certificates(&self, package_id: &str, certs: Vec<ApplicationCertificate>) {
        self.state().certificates.insert(package_id.into(), certs);
    }

    pub fn set_metadata(&self, app_id: &str, metadata: Vec<ApplicationMetaData>) {
        self.state().metadata.insert(app_id.into(), metadata);
    }

    pub fn set_install_size(&self, package_id: &str, bytes: u64) {
        self.state().install_sizes.insert(package_id.into(), bytes);
    }

    /// Start `app_id` without going through `open_app`
    pub fn spawn(&self, app_id: &str) -> i32 {
        let mut state = self.state();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.running.insert(pid, app_id.into());
        pid
    }

    pub fn fail_open(&self, errors: impl IntoIterator<Item = AulError>) {
        self.state().open_failures.extend(errors);
    }

    pub fn fail_launch_request(&self, errors: impl IntoIterator<Item = AppControlError>) {
        self.state().launch_failures.extend(errors);
    }

    pub fn fail_running_contexts(&self, error: Option<AppManagerError>) {
        self.state().contexts_failure = error;
    }

    pub fn fail_packages(&self, error: Option<PackageInfoError>) {
        self.state().packages_failure = error;
    }

    pub fn set_terminate_behavior(&self, behavior: TerminateBehavior) {
        self.state().terminate = behavior;
    }

    /// Answer every launch request that wants a reply with `reply`;
    /// `None` parks the reply tokens instead
    pub fn set_auto_reply(&self, reply: Option<AppControlReply>) {
        self.state().auto_reply = reply;
    }

    pub fn take_parked_replies(&self) -> Vec<ReplyToken> {
        std::mem::take(&mut self.state().parked_replies)
    }

    pub fn set_requested_app_control(&self, requested: Option<RequestedApplicationControl>) {
        self.state().requested = requested;
    }

    pub fn sent_replies(&self) -> Vec<(u64, AppControlReply)> {
        self.state().sent_replies.clone()
    }

    /// Report a package change to the registered listener, if any
    pub fn emit_package_event(&self, event: PackageEvent) -> bool {
        let listener = self.state().listener.clone();
        match listener {
            Some(listener) => {
                listener.notify(event);
                true
            }
            None => false,
        }
    }

    pub fn has_package_listener(&self) -> bool {
        self.state().listener.is_some()
    }

    pub fn open_calls(&self) -> usize {
        self.state().open_calls
    }

    pub fn launch_calls(&self) -> usize {
        self.state().launch_calls
    }

    pub fn is_exited(&self) -> bool {
        self.state().exited
    }

    pub fn is_hidden(&self) -> bool {
        self.state().hidden
    }
}

impl SimState {
    fn resolve(&self, app_id: &str) -> String {
        self.aliases
            .get(app_id)
            .cloned()
            .unwrap_or_else(|| app_id.to_string())
    }

    fn start(&mut self, app_id: &str) -> i32 {
        if let Some((pid, _)) = self.running.iter().find(|(_, id)| id.as_str() == app_id) {
            return *pid;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.running.insert(pid, app_id.to_string());
        pid
    }
}

impl AppManagerPlatform for SimulatedPlatform {
    fn open_app(&self, app_id: &str) -> Result<i32, AulError> {
        let mut state = self.state();
        state.open_calls += 1;
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        let app_id = state.resolve(app_id);
        if !state.apps.contains_key(&app_id) {
            return Err(AulError::General);
        }
        let pid = state.start(&app_id);
        debug!(app_id = %app_id, pid, "simulated launch");
        Ok(pid)
    }

    fn app_id_of_pid(&self, pid: i32) -> Result<String, AppManagerError> {
        self.state()
            .running
            .get(&pid)
            .cloned()
            .ok_or(AppManagerError::NoSuchApp)
    }

    fn is_running(&self, app_id: &str) -> Result<bool, AppManagerError> {
        Ok(self.state().running.values().any(|id| id == app_id))
    }

    fn terminate(&self, pid: i32, notifier: TerminationNotifier) -> Result<(), AppManagerError> {
        let behavior = {
            let mut state = self.state();
            if !state.running.contains_key(&pid) {
                return Err(AppManagerError::AppNotRunning);
            }
            if state.terminate != TerminateBehavior::Survive {
                state.running.remove(&pid);
            }
            state.terminate
        };
        debug!(pid, ?behavior, "simulated terminate");
        if behavior == TerminateBehavior::Notify {
            notifier.notify(pid);
        }
        Ok(())
    }

    fn running_contexts(&self) -> Result<Vec<ApplicationContext>, AppManagerError> {
        let state = self.state();
        if let Some(error) = state.contexts_failure {
            return Err(error);
        }
        Ok(state
            .running
            .iter()
            .map(|(pid, app_id)| ApplicationContext::new(*pid, app_id.clone()))
            .collect())
    }

    fn own_pid(&self) -> i32 {
        self.state().own_pid
    }

    fn own_app_id(&self) -> Result<String, AppManagerError> {
        Ok(self.state().own_app_id.clone())
    }

    fn resolve_alias(&self, app_id: &str) -> String {
        self.state().resolve(app_id)
    }

    fn app_exists(&self, app_id: &str) -> bool {
        self.state().apps.contains_key(app_id)
    }

    fn send_launch_request(
        &self,
        control: &ApplicationControl,
        app_id: Option<&str>,
        reply: Option<ReplyToken>,
    ) -> Result<(), AppControlError> {
        let auto_reply = {
            let mut state = self.state();
            state.launch_calls += 1;
            if let Some(error) = state.launch_failures.pop_front() {
                return Err(error);
            }

            let target = match app_id {
                Some(id) => {
                    let id = state.resolve(id);
                    if !state.apps.contains_key(&id) {
                        return Err(AppControlError::AppNotFound);
                    }
                    id
                }
                None => state
                    .handlers
                    .get(&control.operation)
                    .and_then(|ids| ids.first().cloned())
                    .ok_or(AppControlError::AppNotFound)?,
            };
            let pid = state.start(&target);
            debug!(operation = %control.operation, target = %target, pid, "simulated app control");

            match (reply, state.auto_reply.clone()) {
                (Some(token), Some(answer)) => Some((token, answer)),
                (Some(token), None) => {
                    state.parked_replies.push(token);
                    None
                }
                (None, _) => None,
            }
        };

        if let Some((token, answer)) = auto_reply {
            token.deliver(answer);
        }
        Ok(())
    }

    fn matching_apps(&self, control: &ApplicationControl) -> Result<Vec<String>, AppControlError> {
        Ok(self
            .state()
            .handlers
            .get(&control.operation)
            .cloned()
            .unwrap_or_default())
    }

    fn requested_app_control(
        &self,
    ) -> Result<Option<RequestedApplicationControl>, AppControlError> {
        Ok(self.state().requested.clone())
    }

    fn reply_to_launch_request(
        &self,
        request_id: u64,
        reply: &AppControlReply,
    ) -> Result<(), AppControlError> {
        let mut state = self.state();
        match &state.requested {
            Some(requested) if requested.request_id == request_id => {
                state.sent_replies.push((request_id, reply.clone()));
                Ok(())
            }
            _ => Err(AppControlError::InvalidParameter),
        }
    }

    fn exit(&self) -> Result<(), AppManagerError> {
        self.state().exited = true;
        Ok(())
    }

    fn hide(&self) -> Result<(), AppManagerError> {
        self.state().hidden = true;
        Ok(())
    }
}

impl PackageInfoPlatform for SimulatedPlatform {
    fn app_info(&self, app_id: &str) -> Result<AppRecord, PackageInfoError> {
        self.state()
            .apps
            .get(app_id)
            .cloned()
            .ok_or(PackageInfoError::Internal)
    }

    fn installed_apps(&self) -> Result<Vec<AppRecord>, PackageInfoError> {
        let state = self.state();
        if let Some(error) = state.packages_failure {
            return Err(error);
        }
        Ok(state.apps.values().cloned().collect())
    }

    fn packages(&self) -> Result<Vec<PackageRecord>, PackageInfoError> {
        let state = self.state();
        if let Some(error) = state.packages_failure {
            return Err(error);
        }
        Ok(state.packages.values().cloned().collect())
    }

    fn package(&self, package_id: &str) -> Result<PackageRecord, PackageInfoError> {
        self.state()
            .packages
            .get(package_id)
            .cloned()
            .ok_or(PackageInfoError::NoSuchPackage)
    }

    fn certificates(
        &self,
        package_id: &str,
    ) -> Result<Vec<ApplicationCertificate>, PackageInfoError> {
        let state = self.state();
        if !state.packages.contains_key(package_id) {
            return Err(PackageInfoError::NoSuchPackage);
        }
        Ok(state.certificates.get(package_id).cloned().unwrap_or_default())
    }

    fn metadata(&self, app_id: &str) -> Result<Vec<ApplicationMetaData>, PackageInfoError> {
        let state = self.state();
        if !state.apps.contains_key(app_id) {
            return Err(PackageInfoError::Internal);
        }
        Ok(state.metadata.get(app_id).cloned().unwrap_or_default())
    }

    fn install_size(&self, package_id: &str) -> Result<u64, PackageInfoError> {
        let state = self.state();
        if !state.packages.contains_key(package_id) {
            return Err(PackageInfoError::NoSuchPackage);
        }
        Ok(state.install_sizes.get(package_id).copied().unwrap_or(0))
    }

    fn register_listener(&self, notifier: PackageEventNotifier) -> Result<(), PackageInfoError> {
        self.state().listener = Some(notifier);
        Ok(())
    }

    fn unregister_listener(&self) -> Result<(), PackageInfoError> {
        self.state().listener = None;
        Ok(())
    }
}

pub fn app(app_id: &str, name: &str, package_id: &str) -> AppRecord {
    AppRecord {
        app_id: app_id.into(),
        name: name.into(),
        icon_path: format!("/opt/share/icons/default/small/{}.png", app_id),
        package_id: package_id.into(),
        show: true,
        categories: vec!["http://tizen.org/category/homeapp".into()],
    }
}

pub fn package(package_id: &str, version: &str, package_type: &str) -> PackageRecord {
    PackageRecord {
        package_id: package_id.into(),
        version: version.into(),
        package_type: package_type.into(),
        installed_time: 1_700_000_000,
        root_path: format!("/opt/usr/globalapps/{}", package_id),
    }
}
