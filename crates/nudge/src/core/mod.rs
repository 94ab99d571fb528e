pub mod clock;
pub mod config_cell;
pub mod habits;
pub mod resolver;
pub mod snapshot_cache;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config_cell::ConfigCell;
pub use snapshot_cache::{Generation, SnapshotCache};
