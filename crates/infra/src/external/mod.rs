//! Production implementations of the AI collaborator traits.

pub mod fs_image_store;
pub mod http_gateway;

pub use fs_image_store::FsImageStore;
pub use http_gateway::HttpAiGateway;
