//! mcp-assistant is a personal-assistant chat client whose LLM providers can
//! call tools served over the Model Context Protocol.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration, credentials, the chat timeline and the
//!   orchestrator that runs one chat turn at a time.
//! - [`llm`] holds the Claude, OpenAI and Gemini adapters, the provider
//!   registry and the bounded tool-calling conversation loop.
//! - [`mcp`] provides the connection manager, the JSON-RPC client with its
//!   SSE and in-process transports, the local tool server and the permission
//!   gate.
//! - [`api`] defines the vendor request and response payloads.
//! - [`cli`] parses arguments and runs the line-mode chat.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod llm;
pub mod logging;
pub mod mcp;
