//! Seams to the platform application services.
//!
//! A device build implements these traits over the native SDK; the
//! [`SimulatedPlatform`](crate::simulated::SimulatedPlatform) implements them in memory.

use crate::manager::PackageEventNotifier;
use crate::pending::{ReplyToken, TerminationNotifier};
use crate::types::{
    AppControlReply, ApplicationCertificate, ApplicationContext, ApplicationControl,
    ApplicationMetaData, RequestedApplicationControl,
};

/// Launcher daemon failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AulError {
    #[error("AUL_R_EINVAL: invalid argument")]
    InvalidArgument,
    #[error("AUL_R_ERROR: general error")]
    General,
    #[error("AUL_R_ECOMM: internal IPC error")]
    Communication,
    #[error("AUL_R_ETIMEOUT: timed out")]
    Timeout,
    #[error("AUL_R_EILLACC: illegal access")]
    IllegalAccess,
    #[error("AUL_R_ENOAPP: application not found")]
    NoApp,
}

/// Application manager failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppManagerError {
    #[error("APP_MANAGER_ERROR_INVALID_PARAMETER: invalid parameter")]
    InvalidParameter,
    #[error("APP_MANAGER_ERROR_OUT_OF_MEMORY: out of memory")]
    OutOfMemory,
    #[error("APP_MANAGER_ERROR_IO_ERROR: internal I/O error")]
    Io,
    #[error("APP_MANAGER_ERROR_NO_SUCH_APP: no such application")]
    NoSuchApp,
    #[error("APP_MANAGER_ERROR_DB_FAILED: database error")]
    DbFailed,
    #[error("APP_MANAGER_ERROR_APP_NO_RUNNING: application is not running")]
    AppNotRunning,
    #[error("APP_MANAGER_ERROR_REQUEST_FAILED: request failed")]
    RequestFailed,
    #[error("APP_MANAGER_ERROR_PERMISSION_DENIED: permission denied")]
    PermissionDenied,
}

/// App control (launch request) failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppControlError {
    #[error("APP_CONTROL_ERROR_INVALID_PARAMETER: invalid parameter")]
    InvalidParameter,
    #[error("APP_CONTROL_ERROR_OUT_OF_MEMORY: out of memory")]
    OutOfMemory,
    #[error("APP_CONTROL_ERROR_APP_NOT_FOUND: the application is not found")]
    AppNotFound,
    #[error("APP_CONTROL_ERROR_KEY_NOT_FOUND: specified key not found")]
    KeyNotFound,
    #[error("APP_CONTROL_ERROR_KEY_REJECTED: key is not available")]
    KeyRejected,
    #[error("APP_CONTROL_ERROR_INVALID_DATA_TYPE: invalid data type")]
    InvalidDataType,
    #[error("APP_CONTROL_ERROR_LAUNCH_REJECTED: the application cannot be launched now")]
    LaunchRejected,
    #[error("APP_CONTROL_ERROR_PERMISSION_DENIED: permission denied")]
    PermissionDenied,
    #[error("APP_CONTROL_ERROR_LAUNCH_FAILED: internal launch error")]
    LaunchFailed,
    #[error("APP_CONTROL_ERROR_TIMED_OUT: time out")]
    TimedOut,
    #[error("APP_CONTROL_ERROR_IO_ERROR: I/O error")]
    Io,
}

/// Package database failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PackageInfoError {
    #[error("PMINFO_R_EINVAL: invalid argument")]
    InvalidArgument,
    #[error("PMINFO_R_ERROR: internal error")]
    Internal,
    #[error("PACKAGE_MANAGER_ERROR_NO_SUCH_PACKAGE: no such package")]
    NoSuchPackage,
    #[error("PACKAGE_MANAGER_ERROR_IO_ERROR: internal I/O error")]
    Io,
    #[error("PACKAGE_MANAGER_ERROR_PERMISSION_DENIED: permission denied")]
    PermissionDenied,
}

/// An installed application as the package database describes it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppRecord {
    pub app_id: String,
    pub name: String,
    pub icon_path: String,
    pub package_id: String,
    /// Shown in the launcher (not `nodisplay`)
    pub show: bool,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRecord {
    pub package_id: String,
    pub version: String,
    /// `rpm`, `tpk` or `wgt`
    pub package_type: String,
    /// Seconds since the epoch
    pub installed_time: i64,
    pub root_path: String,
}

impl PackageRecord {
    /// Native system packages carry no signing certificates
    pub fn is_rpm(&self) -> bool {
        self.package_type == "rpm"
    }
}

/// Package-level change, reported once per affected application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEvent {
    Installed { app_id: String },
    Updated { app_id: String },
    Uninstalled { app_id: String },
}

impl PackageEvent {
    pub fn app_id(&self) -> &str {
        match self {
            PackageEvent::Installed { app_id }
            | PackageEvent::Updated { app_id }
            | PackageEvent::Uninstalled { app_id } => app_id,
        }
    }
}

/// Launching, terminating and replying to applications
pub trait AppManagerPlatform: Send + Sync + 'static {
    /// Launch or raise an application; returns its process id
    fn open_app(&self, app_id: &str) -> Result<i32, AulError>;

    fn app_id_of_pid(&self, pid: i32) -> Result<String, AppManagerError>;

    fn is_running(&self, app_id: &str) -> Result<bool, AppManagerError>;

    /// Ask the platform to terminate `pid`. The platform calls
    /// `notifier.notify(pid)` when the process is gone.
    fn terminate(&self, pid: i32, notifier: TerminationNotifier) -> Result<(), AppManagerError>;

    fn running_contexts(&self) -> Result<Vec<ApplicationContext>, AppManagerError>;

    /// Process id of the application hosting this runtime
    fn own_pid(&self) -> i32;

    fn own_app_id(&self) -> Result<String, AppManagerError>;

    /// Map an alias to the real application id; unknown ids come back unchanged
    fn resolve_alias(&self, app_id: &str) -> String;

    fn app_exists(&self, app_id: &str) -> bool;

    /// Send a launch request. When `reply` is set the platform delivers the
    /// launched application's answer through it.
    fn send_launch_request(
        &self,
        control: &ApplicationControl,
        app_id: Option<&str>,
        reply: Option<ReplyToken>,
    ) -> Result<(), AppControlError>;

    /// Ids of the applications able to handle `control`
    fn matching_apps(&self, control: &ApplicationControl) -> Result<Vec<String>, AppControlError>;

    fn requested_app_control(&self)
        -> Result<Option<RequestedApplicationControl>, AppControlError>;

    fn reply_to_launch_request(
        &self,
        request_id: u64,
        reply: &AppControlReply,
    ) -> Result<(), AppControlError>;

    fn exit(&self) -> Result<(), AppManagerError>;

    fn hide(&self) -> Result<(), AppManagerError>;
}

/// Read access to the package database and its change notifications
pub trait PackageInfoPlatform: Send + Sync + 'static {
    fn app_info(&self, app_id: &str) -> Result<AppRecord, PackageInfoError>;

    fn installed_apps(&self) -> Result<Vec<AppRecord>, PackageInfoError>;

    fn packages(&self) -> Result<Vec<PackageRecord>, PackageInfoError>;

    fn package(&self, package_id: &str) -> Result<PackageRecord, PackageInfoError>;

    fn certificates(&self, package_id: &str)
        -> Result<Vec<ApplicationCertificate>, PackageInfoError>;

    fn metadata(&self, app_id: &str) -> Result<Vec<ApplicationMetaData>, PackageInfoError>;

    /// Installed size in bytes; may be slow on a device
    fn install_size(&self, package_id: &str) -> Result<u64, PackageInfoError>;

    fn register_listener(&self, notifier: PackageEventNotifier) -> Result<(), PackageInfoError>;

    fn unregister_listener(&self) -> Result<(), PackageInfoError>;
}
