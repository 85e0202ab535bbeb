//! Agent runtime: provider registry, LLM backend and conversation loop.
//!
//! # Overview
//!
//! The runtime is organized around these concepts:
//!
//! - **ToolHost**: the registry of running tool providers, keyed by name,
//!   which flattens their tools into the menu offered to the model.
//! - **LlmBackend**: a trait abstracting hosted chat-completion APIs.
//! - **Reply**: tool-call directives scraped from model output.
//! - **Agent**: the conversation loop tying the three together.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp::ProviderConfig;
//! use runtime::{Agent, OpenAiBackend, ToolHost};
//!
//! # async fn example() -> runtime::Result<()> {
//! let host = Arc::new(ToolHost::default());
//! host.register_provider(ProviderConfig::new(
//!     "filesystem",
//!     ["npx", "-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//! ))
//! .await?;
//!
//! let backend = OpenAiBackend::builder("sk-...", "gpt-4o-mini").build();
//! let mut agent = Agent::new(backend, host.clone());
//! let answer = agent.process_message("What files are in /tmp?").await?;
//! println!("{answer}");
//!
//! host.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod backend;
mod directive;
mod error;
mod tools;

// Conversation loop
pub use agent::{Agent, DEFAULT_HISTORY_LIMIT, ToolReport};

// LLM backend types
pub use backend::{ChatRequest, ChatResponse, LlmBackend, Message, OpenAiBackend, Role, Usage};

// Directive parsing
pub use directive::{Reply, ToolCall};

// Error types
pub use error::{Error, Result};

// Provider registry
pub use tools::{RegisteredTool, ToolHost};
