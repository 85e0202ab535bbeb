//! Tool host for provider management.

use std::sync::Arc;

use mcp::{JsonRpcResponse, Provider, ProviderConfig, SessionOptions, Tool};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{Error, Result};

/// A tool with its source provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    /// The tool definition advertised by the provider.
    pub tool: Tool,
    /// Name the provider was registered under.
    pub provider: String,
}

/// Manages providers and provides unified tool access.
///
/// Providers are kept in registration order; re-registering a name replaces
/// the entry in place. The lock is never held across a provider exchange.
pub struct ToolHost {
    providers: RwLock<Vec<(String, Arc<Provider>)>>,
    options: SessionOptions,
}

impl ToolHost {
    /// Create an empty tool host.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            options,
        }
    }

    /// Start a provider from its config and register it under `config.name`.
    ///
    /// A provider whose launch or handshake fails is not registered.
    pub async fn register_provider(&self, config: ProviderConfig) -> Result<()> {
        let name = config.name.clone();
        let provider = Provider::with_options(config, self.options.clone());
        provider.start().await?;
        self.register(name, Arc::new(provider)).await;
        Ok(())
    }

    /// Insert or replace a provider. A replaced provider is stopped.
    pub async fn register(&self, name: impl Into<String>, provider: Arc<Provider>) {
        let name = name.into();
        let replaced = {
            let mut providers = self.providers.write().await;
            match providers.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) if Arc::ptr_eq(&entry.1, &provider) => None,
                Some(entry) => Some(std::mem::replace(&mut entry.1, provider)),
                None => {
                    providers.push((name.clone(), provider));
                    None
                }
            }
        };

        if let Some(old) = replaced {
            tracing::info!(provider = %name, "replacing registered provider");
            old.stop().await;
        } else {
            tracing::info!(provider = %name, "provider registered");
        }
    }

    /// Remove and stop a provider. Unknown names are ignored.
    pub async fn unregister_provider(&self, name: &str) {
        let removed = {
            let mut providers = self.providers.write().await;
            let index = providers.iter().position(|(n, _)| n == name);
            index.map(|index| providers.remove(index))
        };

        if let Some((name, provider)) = removed {
            provider.stop().await;
            tracing::info!(provider = %name, "provider removed");
        }
    }

    /// Get a provider by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Provider>> {
        let providers = self.providers.read().await;
        providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, provider)| provider.clone())
    }

    pub async fn provider_names(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        providers.iter().map(|(name, _)| name.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// List all available tools, in registration order then tool order.
    pub async fn list_all_tools(&self) -> Vec<RegisteredTool> {
        let snapshot = self.providers.read().await.clone();

        let mut all = Vec::new();
        for (name, provider) in snapshot {
            all.extend(provider.tools().await.into_iter().map(|tool| RegisteredTool {
                tool,
                provider: name.clone(),
            }));
        }
        all
    }

    /// Find the first provider advertising a tool with this name.
    pub async fn find_tool(&self, tool_name: &str) -> Option<RegisteredTool> {
        self.list_all_tools()
            .await
            .into_iter()
            .find(|registered| registered.tool.name == tool_name)
    }

    /// Call a tool on a named provider.
    ///
    /// Provider-reported errors come back inside the response; only
    /// transport-level failures are returned as `Err`.
    pub async fn call_tool(
        &self,
        provider_name: &str,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<JsonRpcResponse> {
        let provider = self
            .get(provider_name)
            .await
            .ok_or_else(|| Error::ProviderNotFound(provider_name.to_string()))?;

        tracing::debug!(provider = %provider_name, tool = %tool_name, "calling tool");
        Ok(provider.call_tool(tool_name, arguments).await?)
    }

    /// Stop and remove every provider.
    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = self.providers.write().await.drain(..).collect();
        for (name, provider) in drained {
            provider.stop().await;
            tracing::debug!(provider = %name, "provider shut down");
        }
    }
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}
