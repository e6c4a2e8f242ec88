use std::path::Path;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::{MAX_MESSAGE_SIZE, Request, Response};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to agent: {0}")]
    Connect(#[source] std::io::Error),

    #[error("failed to exchange message with agent: {0}")]
    Transport(#[from] LinesCodecError),

    #[error("agent closed the connection without responding")]
    NoResponse,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sends one request to the agent listening on `path` and waits for its
/// response.
pub async fn send(path: impl AsRef<Path>, request: &Request) -> Result<Response, ClientError> {
    let stream = UnixStream::connect(path.as_ref())
        .await
        .map_err(ClientError::Connect)?;
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));

    framed.send(request.encode()?).await?;

    let Some(line) = framed.next().await else {
        return Err(ClientError::NoResponse);
    };
    Ok(serde_json::from_str(&line?)?)
}
