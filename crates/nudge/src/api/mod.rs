pub mod engine;
pub mod rpc;

pub use engine::{SnapshotEvent, SyncEngine};
pub use rpc::{dispatch, RpcRequest, RpcResponse};
