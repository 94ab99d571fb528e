//! nudge - keeps a local snapshot of Notion tasks and habits in sync
//!
//! - `core` - database resolution, weekday habit columns, snapshot cache
//! - `sync` - the background poller
//! - `storage` - config file and token stores
//! - `api` - `SyncEngine` and the JSON RPC dispatcher frontends talk to

pub mod api;
pub mod core;
pub mod login_item;
pub mod storage;
pub mod sync;

pub use api::{dispatch, RpcRequest, RpcResponse, SnapshotEvent, SyncEngine};
pub use nudge_api::{Config, DatabaseConfig, DatabaseKind, Record, Result, SyncError};
