//! Provider protocol types (JSON-RPC 2.0 based).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol revision advertised during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params: Value::Object(Map::new()),
        }
    }

    pub fn with_params(mut self, params: impl Serialize) -> serde_json::Result<Self> {
        self.params = serde_json::to_value(params)?;
        Ok(self)
    }

    /// Serialize to a single newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        // serde_json escapes control characters inside strings, so the
        // compact form never contains a raw newline.
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Returns the result if successful, or the provider's error.
    ///
    /// Note: JSON-RPC 2.0 requires `result` on success, but some providers
    /// omit it for void methods. We treat missing result as `null` rather than
    /// an error for compatibility.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}

impl std::error::Error for JsonRpcError {}

/// Request ID.
///
/// Requests are always sent with string ids; numeric ids are accepted on the
/// way back because some providers echo `"7"` as `7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Whether an echoed id refers to the same request as `self`.
    pub fn matches(&self, echoed: &RequestId) -> bool {
        match (self, echoed) {
            (RequestId::String(a), RequestId::Number(b))
            | (RequestId::Number(b), RequestId::String(a)) => *a == b.to_string(),
            _ => self == echoed,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::String(n.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

// --- Method-specific types ---

/// `initialize` request params.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Client capabilities sent during initialization.
///
/// Tools, resources and prompts are all advertised as supported; each
/// serializes to an empty object.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCapabilities {
    pub tools: Map<String, Value>,
    pub resources: Map<String, Value>,
    pub prompts: Map<String, Value>,
}

/// Client info sent during initialization.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-agent".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Tool definition returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Resource descriptor returned by `resources/list`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Resource {
    pub uri: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Prompt descriptor returned by `prompts/list`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Prompt {
    pub name: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPromptsResult {
    #[serde(default)]
    pub prompts: Vec<Prompt>,
}

/// Params for `tools/call`.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Map<String, Value>,
}
