//! Tool provider client library.
//!
//! This crate talks to external tool providers: child processes that speak
//! line-delimited JSON-RPC 2.0 (MCP style) over their stdin/stdout.
//!
//! A [`Provider`] owns one child process. [`Provider::start`] spawns it and
//! runs the handshake (`initialize`, `tools/list`, `resources/list`,
//! `prompts/list`); afterwards [`Provider::call_tool`] may be called
//! repeatedly. Exchanges are serialized per provider, one request in flight
//! at a time.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Provider, ProviderConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ProviderConfig::new(
//!     "filesystem",
//!     ["npx", "-y", "@modelcontextprotocol/server-filesystem", "./workspace"],
//! );
//!
//! let provider = Provider::new(config);
//! provider.start().await?;
//!
//! for tool in provider.tools().await {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let arguments = serde_json::json!({ "path": "./README.md" });
//! let response = provider
//!     .call_tool("read_file", arguments.as_object().cloned().unwrap_or_default())
//!     .await?;
//! println!("{:?}", response.into_result());
//!
//! provider.stop().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod provider;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, ClientCapabilities, ClientInfo, InitializeParams, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PROTOCOL_VERSION, Prompt, RequestId, Resource, Tool,
};
pub use provider::{
    Capabilities, DEFAULT_TIMEOUT, MAX_LINE_SIZE, Provider, ProviderConfig, SessionOptions,
};
