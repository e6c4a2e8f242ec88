use futures::{SinkExt, StreamExt};
use netguard_api::{
    ContainerRequest, MAX_MESSAGE_SIZE, PodEventKind, PodEventRequest, ReconcileRequest, Request,
    Response,
};
use netguard_common::{ContainerKey, PolicyValue};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::bpf::BpfMap;
use crate::manager::{Manager, Registration};
use crate::types::{PodInfo, PolicyInfo};
use crate::{Error, Result};

impl From<ContainerRequest> for Registration {
    fn from(req: ContainerRequest) -> Self {
        Self {
            id: req.container_id,
            namespace: req.namespace,
            pod_name: req.pod_name,
            net_ns: req.netns,
            if_name: req.if_name,
        }
    }
}

/// Reads one request, writes exactly one response and returns. Any failure
/// to understand the request becomes an error response.
pub async fn handle_connection<S, M>(stream: S, manager: &Manager<M>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));

    let (command, response) = match framed.next().await {
        Some(Ok(line)) => match Request::decode(&line) {
            Ok(request) => {
                let command = request.command().as_str();
                (command, handle_request(request, manager))
            }
            Err(e) => {
                warn!(%e, "rejected request");
                ("UNKNOWN", Response::failure(e.to_string()))
            }
        },
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => (
            "UNKNOWN",
            Response::failure(format!(
                "failed to decode request: larger than {MAX_MESSAGE_SIZE} bytes"
            )),
        ),
        Some(Err(e)) => {
            warn!(%e, "failed to read request");
            ("UNKNOWN", Response::failure(format!("failed to decode request: {e}")))
        }
        None => {
            debug!("connection closed before a request was sent");
            return Ok(());
        }
    };

    manager.metrics().count_request(command, response.success);
    framed.send(serde_json::to_string(&response)?).await?;
    Ok(())
}

/// Applies a decoded request.
pub fn handle_request<M>(request: Request, manager: &Manager<M>) -> Response
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let command = request.command();
    let result = match request {
        Request::Add(req) => manager
            .register_container(req.into())
            .map(|_| Response::success()),
        Request::Delete(req) => manager
            .deregister_container(&req.container_id)
            .map(|_| Response::success()),
        Request::Check(req) => check(manager, &req),
        Request::PodEvent(event) => pod_event(manager, event),
        Request::Reconcile(snapshot) => reconcile(manager, snapshot),
    };
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(%e, %command, "request failed");
            Response::failure(e.to_string())
        }
    }
}

fn check<M>(manager: &Manager<M>, req: &ContainerRequest) -> Result<Response>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let result = manager.check_container(&req.container_id)?;
    Ok(Response::with_result(serde_json::to_value(result)?))
}

fn pod_event<M>(manager: &Manager<M>, event: PodEventRequest) -> Result<Response>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let pod = PodInfo::from(&event.pod);
    if pod.name.is_empty() || pod.namespace.is_empty() {
        return Err(Error::InvalidRequest(
            "pod must carry a name and namespace".into(),
        ));
    }
    info!(pod = %pod.key(), event = ?event.event, "applying pod event");
    match event.event {
        PodEventKind::Added | PodEventKind::Modified => manager.apply_pod(pod)?,
        PodEventKind::Deleted => {
            manager.delete_pod(&pod.namespace, &pod.name, pod.uid.as_deref())?
        }
    }
    Ok(Response::success())
}

fn reconcile<M>(manager: &Manager<M>, snapshot: ReconcileRequest) -> Result<Response>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let pods = snapshot.pods_snapshot.iter().map(PodInfo::from).collect();
    let policies = snapshot
        .policies_snapshot
        .iter()
        .map(PolicyInfo::from)
        .collect();
    manager.reconcile(pods, policies)?;
    Ok(Response::success())
}

#[cfg(test)]
mod test {
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::manager::test::new_manager;

    async fn roundtrip<M>(manager: &Manager<M>, request: impl AsRef<[u8]>) -> Value
    where
        M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read, mut write) = tokio::io::split(client);
        write.write_all(request.as_ref()).await.unwrap();
        write.shutdown().await.unwrap();

        handle_connection(server, manager).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().expect("one response line");
        assert!(lines.next_line().await.unwrap().is_none());
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_delete() {
        let (manager, map) = new_manager();

        let response = roundtrip(
            &manager,
            "{\"command\":\"ADD\",\"containerID\":\"c1\",\"ifName\":\"eth0\"}\n",
        )
        .await;
        assert_eq!(response, json!({"success": true}));
        assert_eq!(map.len(), 1);

        let response = roundtrip(&manager, "{\"command\":\"DEL\",\"containerID\":\"c1\"}\n").await;
        assert_eq!(response, json!({"success": true}));
        assert!(manager.store().get_container("c1").is_none());
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_request_without_newline() {
        let (manager, _) = new_manager();
        let response = roundtrip(&manager, r#"{"command":"ADD","containerID":"c1"}"#).await;
        assert_eq!(response, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (manager, map) = new_manager();
        let response = roundtrip(&manager, "{\"command\":\"FROB\"}\n").await;
        assert_eq!(
            response,
            json!({"success": false, "errorMsg": "unknown command"})
        );
        assert_eq!(manager.store().counts(), (0, 0, 0));
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (manager, _) = new_manager();
        let response = roundtrip(&manager, "{\"command\":\"ADD\",\n").await;
        assert_eq!(response["success"], json!(false));
        let msg = response["errorMsg"].as_str().unwrap();
        assert!(msg.starts_with("failed to decode request"), "{msg}");
        assert_eq!(manager.store().counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_invalid_utf8_gets_a_response() {
        let (manager, map) = new_manager();
        let response = roundtrip(
            &manager,
            b"{\"command\":\"ADD\",\"containerID\":\"\xff\xfe\"}\n",
        )
        .await;
        assert_eq!(response["success"], json!(false));
        let msg = response["errorMsg"].as_str().unwrap();
        assert!(msg.starts_with("failed to decode request"), "{msg}");
        assert_eq!(manager.store().counts(), (0, 0, 0));
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_check() {
        let (manager, _) = new_manager();
        roundtrip(&manager, "{\"command\":\"ADD\",\"containerID\":\"c1\"}\n").await;

        let response = roundtrip(&manager, "{\"command\":\"CHECK\",\"containerID\":\"c1\"}\n").await;
        assert_eq!(
            response,
            json!({
                "success": true,
                "result": {"registered": true, "restricted": false, "recordPresent": true},
            })
        );
    }

    #[tokio::test]
    async fn test_map_failure_is_reported() {
        let (manager, map) = new_manager();
        map.set_failing(true);
        let response = roundtrip(&manager, "{\"command\":\"ADD\",\"containerID\":\"c1\"}\n").await;
        assert_eq!(response["success"], json!(false));
        assert!(manager.store().get_container("c1").is_none());
    }

    #[tokio::test]
    async fn test_pod_event_and_reconcile() {
        let (manager, _) = new_manager();
        let pod = json!({
            "metadata": {
                "name": "web",
                "namespace": "default",
                "uid": "uid-web",
                "labels": {"network.policy": "restricted"},
            },
            "status": {"phase": "Running", "podIP": "10.0.0.4"},
        });

        let request = json!({"command": "POD_EVENT", "event": "POD_ADDED", "pod": pod});
        let response = roundtrip(&manager, &format!("{request}\n")).await;
        assert_eq!(response, json!({"success": true}));
        assert!(manager.store().get_pod("default", "web").is_some());
        let check = manager.check_container("uid-web").unwrap();
        assert!(check.restricted);

        let request = json!({"command": "RECONCILE", "podsSnapshot": [], "policiesSnapshot": []});
        let response = roundtrip(&manager, &format!("{request}\n")).await;
        assert_eq!(response, json!({"success": true}));
        assert_eq!(manager.store().counts(), (0, 0, 0));
        assert!(
            manager
                .check_container("uid-web")
                .map(|c| !c.record_present)
                .unwrap()
        );
    }
}
