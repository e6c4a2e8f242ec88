use netguard_api::{ContainerRequest, Request};
use tracing::{error, info};

use crate::config::Args;
use crate::response::{Response, Success};
use crate::types::Input;
use crate::{Result, exchange};

// DEL may arrive without a prevResult when the runtime is cleaning up after
// a failed ADD, so it is not required here.
pub fn delete(args: &Args, input: Input) -> Response {
    info!("delete called, received input {:?}", input);
    let cni_version = input.cni_version.clone();
    match deregister(args, &input) {
        Ok(()) => Response::Empty,
        Err(e) => {
            error!(%e, "delete failed");
            e.into_response(cni_version)
        }
    }
}

fn deregister(args: &Args, input: &Input) -> Result<()> {
    let sandbox = match Success::from_previous(input.previous_result.clone()) {
        Ok(prev) => prev.sandbox(),
        Err(_) => None,
    };
    let request = Request::Delete(ContainerRequest {
        container_id: args.container_id()?.to_owned(),
        namespace: args.pod_namespace(),
        pod_name: args.pod_name(),
        netns: args.net_ns().or(sandbox),
        if_name: args.ifname.clone(),
    });
    let reply = exchange(&input.socket(), &request)?;
    info!("received reply {:?}", reply);
    Ok(())
}

#[cfg(test)]
mod test {
    use netguard_api::Response as AgentResponse;

    use super::*;
    use crate::config::Command;
    use crate::config::test::args;
    use crate::testing::{fake_agent, input, socket_path};

    #[test]
    fn test_delete_without_previous_result() {
        let socket = socket_path("del-ok");
        let agent = fake_agent(&socket, AgentResponse::success());
        let mut input = input(&socket);
        input.previous_result = None;

        let resp = delete(&args(Command::Delete), input);
        assert!(matches!(resp, Response::Empty), "{resp:?}");
        let Request::Delete(sent) = agent.join().unwrap() else {
            panic!("expected a DEL request");
        };
        assert_eq!(sent.container_id, "c1");
    }

    #[test]
    fn test_delete_without_agent() {
        let socket = socket_path("del-missing");
        let Response::Error(resp) = delete(&args(Command::Delete), input(&socket)) else {
            panic!("expected an error response");
        };
        assert_eq!(resp.code, 11);
    }
}
