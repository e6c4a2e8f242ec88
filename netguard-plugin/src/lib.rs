pub mod add;
pub mod check;
pub mod config;
pub mod delete;
pub mod error;
pub mod response;
pub mod types;
pub mod version;

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use netguard_api::Request;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::Error;

pub const CNI_VERSION: Version = Version::new(1, 1, 0);
pub const SUPPORTED_CNI_VERSION: [Version; 4] = [
    Version::new(0, 3, 1),
    Version::new(0, 4, 0),
    Version::new(1, 0, 0),
    Version::new(1, 1, 0),
];

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Sends one request to the agent and turns a rejection into an error.
pub(crate) fn exchange(socket: &Path, request: &Request) -> Result<netguard_api::Response> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    debug!(command = %request.command(), socket = %socket.display(), "sending request to agent");
    let response = runtime.block_on(netguard_api::client::send(socket, request))?;
    if !response.success {
        return Err(Error::Agent(
            response
                .error_msg
                .unwrap_or_else(|| "request rejected".into()),
        ));
    }
    Ok(response)
}

pub(crate) fn serialize_to_string<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: ToString,
{
    value.to_string().serialize(serializer)
}

pub(crate) fn serialize_to_string_slice<S, T>(
    values: &[T],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    T: ToString,
{
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .serialize(serializer)
}

pub(crate) fn deserialize_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let buf = String::deserialize(deserializer)?;
    T::from_str(&buf).map_err(|e| serde::de::Error::custom(e.to_string()))
}
