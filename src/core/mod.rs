pub mod config;
pub mod credentials;
pub mod message;
pub mod orchestrator;
pub mod runtime;
