pub mod config_store;
pub mod token_store;

pub use config_store::{FileConfigStore, MemoryConfigStore};
pub use token_store::{KeyringTokenStore, MemoryTokenStore};
