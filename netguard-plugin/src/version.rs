use tracing::info;

use crate::response::{Response, VersionResponse};
use crate::{CNI_VERSION, SUPPORTED_CNI_VERSION};

pub fn version() -> Response {
    info!("version called");
    Response::Version(VersionResponse {
        cni_version: CNI_VERSION,
        supported_versions: SUPPORTED_CNI_VERSION.to_vec(),
    })
}
