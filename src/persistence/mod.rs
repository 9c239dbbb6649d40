//! Persistence - Host configuration stored as JSON

mod config_store;

pub use config_store::{ConfigStore, HostConfigFile};
