//! Message layer: typed payloads, schema-tagged encode/decode, and the
//! length-prefixed wire framing shared by all three sockets.

pub mod frame;
pub mod schema;
pub mod types;

pub use types::{ContainerListing, DownstreamEvent, ProfileData, PublishMsg, RpcReply, RpcRequest};
