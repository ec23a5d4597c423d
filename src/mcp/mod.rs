pub mod bridge;
pub mod client;
pub mod local;
pub mod manager;
pub mod permissions;
pub mod tool;
pub mod transport;

pub use manager::{McpConnectionManager, LOCAL_CONNECTION_NAME};
pub use permissions::PermissionGate;
