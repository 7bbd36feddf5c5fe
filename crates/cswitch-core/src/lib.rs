pub mod blacklist;
pub mod error;
pub mod recovery;
pub mod relay;
pub mod upstream_client;

pub use blacklist::BlacklistTracker;
pub use error::ProxyError;
pub use recovery::RecoverySweeper;
pub use relay::{
    BodyPatchError, RelayBody, RelayEngine, RelayRequest, RelayResponse, RequestMeta, Selection,
    SelectionError, endpoint_for, patch_model, select_provider,
};
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
