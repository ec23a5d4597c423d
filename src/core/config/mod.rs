pub mod data;
pub mod io;
pub mod store;

pub use data::{Config, HotWordSettings, MemorySettings, RemoteServerConfig, RemoteServerList};
pub use io::ConfigError;
pub use store::ConfigStore;
