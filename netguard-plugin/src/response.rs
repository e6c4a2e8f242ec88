use std::collections::HashMap;
use std::io::Write;
use std::process::ExitCode;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Interface;
use crate::{Error, Result};

#[derive(Debug)]
pub enum Response {
    Success(Success),
    Error(CniErrorResponse),
    Version(VersionResponse),
    /// DEL and CHECK print nothing on success.
    Empty,
}

impl Response {
    pub fn write_out(self) -> ExitCode {
        self.write_to(&mut std::io::stdout().lock())
    }

    pub fn write_to(self, out: &mut impl Write) -> ExitCode {
        let (encoded, code) = match &self {
            Response::Success(success) => (serde_json::to_vec(success), ExitCode::SUCCESS),
            Response::Error(error) => (serde_json::to_vec(error), ExitCode::FAILURE),
            Response::Version(version) => (serde_json::to_vec(version), ExitCode::SUCCESS),
            Response::Empty => (Ok(vec![]), ExitCode::SUCCESS),
        };
        let buf = match encoded {
            Ok(buf) => buf,
            Err(e) => {
                tracing::error!(%e, "failed to encode response");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = out.write_all(&buf).and_then(|_| out.flush()) {
            tracing::error!(%e, "failed to write out response to stdout");
            return ExitCode::FAILURE;
        }
        code
    }
}

/// The result of the previous plugin in the chain. Only the fields the
/// plugin reads are typed, everything else passes through untouched.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Success {
    #[serde(
        serialize_with = "crate::serialize_to_string",
        deserialize_with = "crate::deserialize_from_str"
    )]
    pub cni_version: Version,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(flatten)]
    pub custom: HashMap<String, Value>,
}

impl Success {
    pub fn from_previous(prev: Option<Value>) -> Result<Self> {
        let Some(prev) = prev else {
            return Err(Error::NoPreviousResult(
                "no previous result found, this CNI must be chained".into(),
            ));
        };
        Ok(Success::deserialize(prev)?)
    }

    /// Network namespace of the first interface placed inside a container.
    pub fn sandbox(&self) -> Option<String> {
        self.interfaces
            .iter()
            .find_map(|iface| iface.sandbox.as_ref())
            .map(|path| path.to_string_lossy().into_owned())
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    #[serde(serialize_with = "crate::serialize_to_string")]
    pub cni_version: Version,
    #[serde(serialize_with = "crate::serialize_to_string_slice")]
    pub supported_versions: Vec<Version>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CniErrorResponse {
    #[serde(
        serialize_with = "crate::serialize_to_string",
        deserialize_with = "crate::deserialize_from_str"
    )]
    pub cni_version: Version,
    pub code: u32,
    pub msg: String,
    pub details: String,
}
