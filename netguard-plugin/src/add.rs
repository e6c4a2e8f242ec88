use netguard_api::{ContainerRequest, Request};
use tracing::{error, info};

use crate::config::Args;
use crate::response::{Response, Success};
use crate::types::Input;
use crate::{Result, exchange};

/// Registers the container with the agent and hands the previous result
/// back to the runtime unchanged.
pub fn add(args: &Args, input: Input) -> Response {
    info!(
        "add called, received input {:?} for containerid {:?}",
        input, args.container_id
    );
    let cni_version = input.cni_version.clone();
    match register(args, input) {
        Ok(success) => {
            info!("add response {:?}", success);
            Response::Success(success)
        }
        Err(e) => {
            error!(%e, "add failed");
            e.into_response(cni_version)
        }
    }
}

fn register(args: &Args, input: Input) -> Result<Success> {
    let prev = Success::from_previous(input.previous_result.clone())?;
    let request = request(args, &prev)?;
    let reply = exchange(&input.socket(), &request)?;
    info!("received reply {:?}", reply);
    Ok(prev)
}

pub(crate) fn request(args: &Args, prev: &Success) -> Result<Request> {
    Ok(Request::Add(ContainerRequest {
        container_id: args.container_id()?.to_owned(),
        namespace: args.pod_namespace(),
        pod_name: args.pod_name(),
        netns: args.net_ns().or_else(|| prev.sandbox()),
        if_name: args.ifname.clone(),
    }))
}
