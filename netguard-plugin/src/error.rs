use netguard_api::client::ClientError;
use semver::Version;
use thiserror::Error;

use crate::response::{CniErrorResponse, Response};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("incompatible version {0}")]
    IncompatibleVersion(Version),

    #[error("container unknown: {0}")]
    ContainerUnknown(String),

    #[error("invalid environment variables: {0}")]
    InvalidRequiredEnvVariables(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing previous result: {0}")]
    NoPreviousResult(String),

    #[error("agent rejected request: {0}")]
    Agent(String),
}

impl Error {
    /// Codes 1-11 are the well-known CNI error codes, 100 and up are plugin specific.
    pub fn code(&self) -> u32 {
        match self {
            Error::IncompatibleVersion(_) => 1,
            Error::ContainerUnknown(_) => 3,
            Error::InvalidRequiredEnvVariables(_) | Error::Parse(_) => 4,
            Error::Io(_) => 5,
            Error::Json(_) => 6,
            Error::Transient(_) => 11,
            Error::Agent(_) => 100,
            Error::NoPreviousResult(_) => 102,
        }
    }

    fn msg(&self) -> &'static str {
        match self {
            Error::IncompatibleVersion(_) => "Incompatible Version",
            Error::ContainerUnknown(_) => "Container Unknown",
            Error::InvalidRequiredEnvVariables(_) | Error::Parse(_) => {
                "Invalid Required Environment Variables"
            }
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::Transient(_) => "Try Again Later",
            Error::Agent(_) => "Agent Error",
            Error::NoPreviousResult(_) => "No Previous Result",
        }
    }

    pub fn into_response(self, cni_version: Version) -> Response {
        Response::Error(CniErrorResponse {
            cni_version,
            code: self.code(),
            msg: self.msg().into(),
            details: self.to_string(),
        })
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            // the agent may still be starting up
            ClientError::Connect(_) | ClientError::NoResponse => Self::Transient(err.to_string()),
            ClientError::Transport(_) | ClientError::Json(_) => Self::Agent(err.to_string()),
        }
    }
}
