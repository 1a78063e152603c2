//! Switchboard is a streaming chat gateway for LLM providers and remote tool
//! servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] speaks JSON-RPC to remote MCP tool servers over streamable HTTP
//!   or SSE and owns the registry of open tool sessions.
//! - [`tools`] adapts remote catalogs into runnable tools and merges them with
//!   client-supplied and integrated tools.
//! - [`core`] holds configuration, provider/model selection, the model
//!   runtime, the UI event stream encoding and per-request dispatch.
//! - [`server`] exposes the dispatcher over HTTP.
//! - [`api`] defines the OpenAI-compatible wire payloads.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod tools;
