use netguard_api::{CheckResult, ContainerRequest, Request};
use tracing::{error, info};

use crate::config::Args;
use crate::response::{Response, Success};
use crate::types::Input;
use crate::{Error, Result, exchange};

/// Verifies the agent still tracks the container and its kernel record.
pub fn check(args: &Args, input: Input) -> Response {
    info!("check called, received input {:?}", input);
    let cni_version = input.cni_version.clone();
    match verify(args, &input) {
        Ok(()) => Response::Empty,
        Err(e) => {
            error!(%e, "check failed");
            e.into_response(cni_version)
        }
    }
}

fn verify(args: &Args, input: &Input) -> Result<()> {
    let prev = Success::from_previous(input.previous_result.clone())?;
    let container_id = args.container_id()?.to_owned();
    let request = Request::Check(ContainerRequest {
        container_id: container_id.clone(),
        namespace: args.pod_namespace(),
        pod_name: args.pod_name(),
        netns: args.net_ns().or_else(|| prev.sandbox()),
        if_name: args.ifname.clone(),
    });
    let reply = exchange(&input.socket(), &request)?;
    let Some(result) = reply.result else {
        return Err(Error::Agent("check reply carried no result".into()));
    };
    let result: CheckResult = serde_json::from_value(result)?;
    if !result.registered {
        return Err(Error::ContainerUnknown(container_id));
    }
    if !result.record_present {
        return Err(Error::ContainerUnknown(format!(
            "{container_id} has no kernel record"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use netguard_api::Response as AgentResponse;
    use serde_json::json;

    use super::*;
    use crate::config::Command;
    use crate::config::test::args;
    use crate::testing::{fake_agent, input, socket_path};

    #[test]
    fn test_check_registered() {
        let socket = socket_path("check-ok");
        let agent = fake_agent(
            &socket,
            AgentResponse::with_result(
                json!({"registered": true, "restricted": true, "recordPresent": true}),
            ),
        );
        let resp = check(&args(Command::Check), input(&socket));
        assert!(matches!(resp, Response::Empty), "{resp:?}");
        assert!(matches!(agent.join().unwrap(), Request::Check(_)));
    }

    #[test]
    fn test_check_unknown_container() {
        let socket = socket_path("check-unknown");
        let agent = fake_agent(
            &socket,
            AgentResponse::with_result(
                json!({"registered": false, "restricted": false, "recordPresent": false}),
            ),
        );
        let Response::Error(resp) = check(&args(Command::Check), input(&socket)) else {
            panic!("expected an error response");
        };
        assert_eq!(resp.code, 3);
        agent.join().unwrap();
    }
}
