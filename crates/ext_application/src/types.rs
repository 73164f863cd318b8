//! Values exchanged with scripts and the platform.

use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

pub const APP_CONTROL_OPERATION_VIEW: &str = "http://tizen.org/appcontrol/operation/view";
pub const APP_CONTROL_OPERATION_SHARE: &str = "http://tizen.org/appcontrol/operation/share";
pub const APP_CONTROL_OPERATION_MULTI_SHARE: &str =
    "http://tizen.org/appcontrol/operation/multi_share";

/// A key with one or more string values carried by an app control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationControlData {
    pub key: String,
    #[serde(default)]
    pub value: Vec<String>,
}

impl ApplicationControlData {
    pub fn new(key: impl Into<String>, value: Vec<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// An implicit or explicit launch request: an operation plus optional
/// target description and data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationControl {
    pub operation: String,
    pub uri: Option<String>,
    pub mime: Option<String>,
    pub category: Option<String>,
    pub data: Vec<ApplicationControlData>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

impl ApplicationControl {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_data(mut self, data: ApplicationControlData) -> Self {
        self.data.push(data);
        self
    }

    /// Check the fields the platform requires for this operation.
    ///
    /// VIEW and SHARE need a URI, MULTI_SHARE needs data, and every data
    /// entry needs a key.
    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.operation.is_empty() {
            return Err(ApplicationError::invalid_argument("operation is mandatory"));
        }

        match self.operation.as_str() {
            APP_CONTROL_OPERATION_VIEW | APP_CONTROL_OPERATION_SHARE if is_blank(&self.uri) => {
                return Err(ApplicationError::invalid_argument(format!(
                    "uri is mandatory for {}",
                    self.operation
                )));
            }
            APP_CONTROL_OPERATION_MULTI_SHARE if self.data.is_empty() => {
                return Err(ApplicationError::invalid_argument(
                    "data is mandatory for multi_share",
                ));
            }
            _ => {}
        }

        if self.data.iter().any(|d| d.key.is_empty()) {
            return Err(ApplicationError::invalid_argument(
                "application control data key must not be empty",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInformation {
    pub id: String,
    pub name: String,
    pub icon_path: String,
    pub version: String,
    pub show: bool,
    pub categories: Vec<String>,
    /// Install time in milliseconds since the epoch
    pub install_date: i64,
    pub package_id: String,
}

/// A running application instance; `id` is the process id as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationContext {
    pub id: String,
    pub app_id: String,
}

impl ApplicationContext {
    pub fn new(pid: i32, app_id: impl Into<String>) -> Self {
        Self {
            id: pid.to_string(),
            app_id: app_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateType {
    AuthorRoot,
    AuthorIntermediate,
    AuthorSigner,
    DistributorRoot,
    DistributorIntermediate,
    DistributorSigner,
    Distributor2Root,
    Distributor2Intermediate,
    Distributor2Signer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCertificate {
    #[serde(rename = "type")]
    pub kind: CertificateType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetaData {
    pub key: String,
    pub value: String,
}

/// The application this runtime belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentApplication {
    pub app_info: ApplicationInformation,
    pub context_id: String,
}

/// The app control that launched the current application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedApplicationControl {
    pub app_control: ApplicationControl,
    /// Empty when the caller is unknown or already gone
    pub caller_app_id: String,
    /// Platform handle of the launch request, used to address the reply
    pub request_id: u64,
}

/// Result a launched application sends back to its caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppControlReply {
    Succeeded(Vec<ApplicationControlData>),
    Failed,
    Canceled,
}

/// Installed-application change delivered to info event listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AppInfoEvent {
    Installed { info: ApplicationInformation },
    Updated { info: ApplicationInformation },
    #[serde(rename_all = "camelCase")]
    Uninstalled { app_id: String },
}

/// Applications able to handle an app control, with the control they matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundApps {
    pub apps: Vec<ApplicationInformation>,
    pub app_control: ApplicationControl,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_validate_requires_operation() {
        let err = ApplicationControl::default().validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_validate_view_and_share_need_uri() {
        let view = ApplicationControl::new(APP_CONTROL_OPERATION_VIEW);
        assert!(view.validate().is_err());
        assert!(view
            .clone()
            .with_uri("file:///tmp/a.jpg")
            .validate()
            .is_ok());

        let mut share = ApplicationControl::new(APP_CONTROL_OPERATION_SHARE);
        share.uri = Some(String::new());
        assert!(share.validate().is_err());
    }

    #[test]
    fn test_validate_multi_share_needs_data() {
        let control = ApplicationControl::new(APP_CONTROL_OPERATION_MULTI_SHARE);
        assert!(control.validate().is_err());
        let control = control.with_data(ApplicationControlData::new(
            "http://tizen.org/appcontrol/data/path",
            vec!["/tmp/a".into(), "/tmp/b".into()],
        ));
        assert!(control.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let control = ApplicationControl::new("http://tizen.org/appcontrol/operation/pick")
            .with_data(ApplicationControlData::new("", vec!["x".into()]));
        assert_eq!(
            control.validate().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_wire_shapes() {
        let json = serde_json::to_value(ApplicationCertificate {
            kind: CertificateType::Distributor2Signer,
            value: "MIIC".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "DISTRIBUTOR2_SIGNER");

        let json = serde_json::to_value(AppInfoEvent::Uninstalled {
            app_id: "org.example.gone".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "uninstalled");
        assert_eq!(json["appId"], "org.example.gone");

        let control: ApplicationControl = serde_json::from_str(
            r#"{"operation": "op", "data": [{"key": "k", "value": ["v"]}]}"#,
        )
        .unwrap();
        assert_eq!(control.uri, None);
        assert_eq!(control.data[0].value, vec!["v".to_string()]);
    }
}
