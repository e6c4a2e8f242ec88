use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, SUPPORTED_CNI_VERSION};

/// Network configuration handed to the plugin on stdin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(
        serialize_with = "crate::serialize_to_string",
        deserialize_with = "crate::deserialize_from_str"
    )]
    pub cni_version: Version,

    #[serde(default)]
    pub name: String,

    /// Socket of the node agent, defaults to the agent's well-known path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_socket: Option<PathBuf>,

    #[serde(
        default,
        rename = "prevResult",
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_result: Option<Value>,
}

impl Input {
    pub fn parse(buf: &str) -> Result<Self> {
        let input: Input = serde_json::from_str(buf)?;
        if !SUPPORTED_CNI_VERSION.contains(&input.cni_version) {
            return Err(Error::IncompatibleVersion(input.cni_version));
        }
        Ok(input)
    }

    pub fn socket(&self) -> PathBuf {
        self.agent_socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(netguard_api::DEFAULT_SOCKET_PATH))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<PathBuf>,
}
