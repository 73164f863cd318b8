//! Permissions for the application module
//!
//! In dev mode, all operations are allowed.
//! Otherwise operations are checked against the manifest's
//! `[permissions.application]` table.

use ext_application::ApplicationCapabilityChecker;
use globset::{GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Permissions section from tizen.toml
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Permissions {
    pub application: Option<ApplicationPermissions>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApplicationPermissions {
    /// Glob patterns for application ids that may be launched
    pub launch: Option<Vec<String>>,
    pub kill: Option<bool>,
    pub certificates: Option<bool>,
    /// Listing installed and running applications (default: allowed)
    pub query: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Permission denied: {capability} for {resource}")]
    Denied {
        capability: String,
        resource: String,
    },

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),
}

/// Runtime capabilities checker
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub dev_mode: bool,
    launch_patterns: Option<GlobSet>,
    kill: bool,
    certificates: bool,
    query: bool,
}

impl Capabilities {
    /// Create capabilities from manifest permissions
    pub fn from_permissions(
        permissions: Option<&Permissions>,
        dev_mode: bool,
    ) -> Result<Self, CapabilityError> {
        let application = permissions
            .and_then(|p| p.application.clone())
            .unwrap_or_default();

        Ok(Self {
            dev_mode,
            launch_patterns: Self::compile_patterns(application.launch.as_ref())?,
            kill: application.kill.unwrap_or(false),
            certificates: application.certificates.unwrap_or(false),
            query: application.query.unwrap_or(true),
        })
    }

    fn compile_patterns(patterns: Option<&Vec<String>>) -> Result<Option<GlobSet>, CapabilityError> {
        match patterns {
            None => Ok(None),
            Some(pats) if pats.is_empty() => Ok(None),
            Some(pats) => {
                let mut builder = GlobSetBuilder::new();
                for pat in pats {
                    // Application ids have no path separators
                    let glob = globset::GlobBuilder::new(pat)
                        .literal_separator(false)
                        .build()
                        .map_err(|e| CapabilityError::InvalidPattern(e.to_string()))?;
                    builder.add(glob);
                }
                Ok(Some(builder.build().map_err(|e| {
                    CapabilityError::InvalidPattern(e.to_string())
                })?))
            }
        }
    }

    fn denied(capability: &str, resource: &str) -> CapabilityError {
        CapabilityError::Denied {
            capability: capability.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Check if launching `app_id` is allowed. An empty id (implicit app
    /// control) passes whenever any launch pattern is configured.
    pub fn check_launch(&self, app_id: &str) -> Result<(), CapabilityError> {
        if self.dev_mode {
            return Ok(());
        }

        match &self.launch_patterns {
            None => Err(Self::denied("application.launch", app_id)),
            Some(_) if app_id.is_empty() => Ok(()),
            Some(patterns) => {
                if patterns.is_match(app_id) {
                    Ok(())
                } else {
                    Err(Self::denied("application.launch", app_id))
                }
            }
        }
    }

    pub fn check_kill(&self) -> Result<(), CapabilityError> {
        if self.dev_mode || self.kill {
            Ok(())
        } else {
            Err(Self::denied("application.kill", "other applications"))
        }
    }

    pub fn check_certificates(&self) -> Result<(), CapabilityError> {
        if self.dev_mode || self.certificates {
            Ok(())
        } else {
            Err(Self::denied("application.certificates", "package certificates"))
        }
    }

    pub fn check_query(&self) -> Result<(), CapabilityError> {
        if self.dev_mode || self.query {
            Ok(())
        } else {
            Err(Self::denied("application.query", "installed applications"))
        }
    }
}

fn allowed(result: Result<(), CapabilityError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Adapter that implements ext_application::ApplicationCapabilityChecker using Capabilities
pub struct ApplicationCapabilityAdapter {
    capabilities: Arc<Capabilities>,
}

impl ApplicationCapabilityAdapter {
    pub fn new(capabilities: Arc<Capabilities>) -> Self {
        Self { capabilities }
    }
}

impl ApplicationCapabilityChecker for ApplicationCapabilityAdapter {
    fn can_launch(&self, app_id: &str) -> bool {
        allowed(self.capabilities.check_launch(app_id))
    }

    fn can_kill(&self) -> bool {
        allowed(self.capabilities.check_kill())
    }

    fn can_read_certificates(&self) -> bool {
        allowed(self.capabilities.check_certificates())
    }

    fn can_query_apps(&self) -> bool {
        allowed(self.capabilities.check_query())
    }
}
