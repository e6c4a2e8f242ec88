//! Wire protocol between the agent and the per-container setup process.
//!
//! Every connection carries exactly one request and one response, each a
//! single JSON document on its own line.

pub mod client;

use std::fmt::Display;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/cni/daemon.sock";

/// Upper bound for one request line; reconcile snapshots are the large case.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown command")]
    UnknownCommand(String),

    #[error("failed to decode request: missing command")]
    MissingCommand,

    #[error("failed to decode request: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Add,
    Delete,
    Check,
    PodEvent,
    Reconcile,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Add => "ADD",
            Command::Delete => "DEL",
            Command::Check => "CHECK",
            Command::PodEvent => "POD_EVENT",
            Command::Reconcile => "RECONCILE",
        }
    }
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Command::Add),
            "DEL" => Ok(Command::Delete),
            "CHECK" => Ok(Command::Check),
            "POD_EVENT" => Ok(Command::PodEvent),
            "RECONCILE" => Ok(Command::Reconcile),
            _ => Err(DecodeError::UnknownCommand(s.to_owned())),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    #[serde(rename = "ADD")]
    Add(ContainerRequest),

    #[serde(rename = "DEL")]
    Delete(ContainerRequest),

    #[serde(rename = "CHECK")]
    Check(ContainerRequest),

    #[serde(rename = "POD_EVENT")]
    PodEvent(PodEventRequest),

    #[serde(rename = "RECONCILE")]
    Reconcile(ReconcileRequest),
}

impl Request {
    /// Decodes one request. The whole payload is validated here so callers
    /// never act on a partially understood request.
    pub fn decode(input: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(input)?;
        let Some(command) = value.get("command") else {
            return Err(DecodeError::MissingCommand);
        };
        let Some(command) = command.as_str() else {
            return Err(DecodeError::MissingCommand);
        };
        Command::from_str(command)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn command(&self) -> Command {
        match self {
            Request::Add(_) => Command::Add,
            Request::Delete(_) => Command::Delete,
            Request::Check(_) => Command::Check,
            Request::PodEvent(_) => Command::PodEvent,
            Request::Reconcile(_) => Command::Reconcile,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    #[serde(rename = "containerID")]
    pub container_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Path of the container's network namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netns: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_name: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PodEventKind {
    #[serde(rename = "POD_ADDED")]
    Added,
    #[serde(rename = "POD_MODIFIED")]
    Modified,
    #[serde(rename = "POD_DELETED")]
    Deleted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PodEventRequest {
    pub event: PodEventKind,
    pub pod: Pod,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub pods_snapshot: Vec<Pod>,
    pub policies_snapshot: Vec<NetworkPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            success: true,
            error_msg: None,
            result: Some(result),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error_msg: Some(msg.into()),
            result: None,
        }
    }
}

/// Result payload of a CHECK request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub registered: bool,
    pub restricted: bool,
    pub record_present: bool,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_add() {
        let req = Request::decode(r#"{"command":"ADD","containerID":"c1","ifName":"eth0"}"#)
            .expect("valid request");
        let Request::Add(add) = req else {
            panic!("expected ADD");
        };
        assert_eq!(add.container_id, "c1");
        assert_eq!(add.if_name.as_deref(), Some("eth0"));
        assert_eq!(add.namespace, None);
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = Request::decode(r#"{"command":"FROB"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand(ref c) if c == "FROB"));
        assert_eq!(err.to_string(), "unknown command");
    }

    #[test]
    fn test_decode_malformed() {
        let err = Request::decode(r#"{"command":"ADD""#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        // known command, missing required field
        let err = Request::decode(r#"{"command":"DEL"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(err.to_string().starts_with("failed to decode request"));

        let err = Request::decode(r#"{"containerID":"c1"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingCommand));
    }

    #[test]
    fn test_decode_pod_event() {
        let raw = json!({
            "command": "POD_EVENT",
            "event": "POD_DELETED",
            "pod": {
                "metadata": {"name": "web", "namespace": "default"},
            },
        });
        let req = Request::decode(&raw.to_string()).expect("valid pod event");
        let Request::PodEvent(ev) = req else {
            panic!("expected POD_EVENT");
        };
        assert_eq!(ev.event, PodEventKind::Deleted);
        assert_eq!(ev.pod.metadata.name.as_deref(), Some("web"));

        let raw = json!({
            "command": "POD_EVENT",
            "event": "POD_EXPLODED",
            "pod": {"metadata": {}},
        });
        assert!(matches!(
            Request::decode(&raw.to_string()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_reconcile_requires_both_snapshots() {
        let raw = json!({"command": "RECONCILE", "podsSnapshot": []});
        assert!(Request::decode(&raw.to_string()).is_err());

        let raw = json!({"command": "RECONCILE", "podsSnapshot": [], "policiesSnapshot": []});
        let req = Request::decode(&raw.to_string()).expect("valid reconcile");
        assert_eq!(req.command(), Command::Reconcile);
    }

    #[test]
    fn test_response_serialization() {
        assert_eq!(
            serde_json::to_string(&Response::success()).unwrap(),
            r#"{"success":true}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::failure("unknown command")).unwrap(),
            r#"{"success":false,"errorMsg":"unknown command"}"#
        );
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let req = Request::Delete(ContainerRequest {
            container_id: "c1".into(),
            ..Default::default()
        });
        assert_eq!(req.encode().unwrap(), r#"{"command":"DEL","containerID":"c1"}"#);
    }
}
