//! Conversation loop that lets the model call provider tools.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{ChatRequest, LlmBackend, Message};
use crate::directive::{Reply, ToolCall};
use crate::tools::{RegisteredTool, ToolHost};
use crate::Result;

/// Messages from the history sent with each request.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const PLAIN_PROMPT: &str =
    "You are an AI assistant. Answer the user's questions as well as you can.";

const TOOL_PROMPT_HEADER: &str = "You are an AI assistant that can use tools provided by external \
tool providers.\n\nAvailable tools:\n";

const TOOL_PROMPT_FOOTER: &str = "\n\nTo use a tool, reply in exactly this format:\n\
TOOL_CALL: tool_name\n\
SERVER: provider_name\n\
PARAMS: {\"param1\": \"value1\", \"param2\": \"value2\"}\n\n\
Otherwise, answer the user normally.";

/// Outcome of one tool call, reported back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolReport {
    pub tool: String,
    pub server: Option<String>,
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// A conversation with tool access.
pub struct Agent<B> {
    backend: B,
    host: Arc<ToolHost>,
    history: Vec<Message>,
    history_limit: usize,
}

impl<B: LlmBackend> Agent<B> {
    pub fn new(backend: B, host: Arc<ToolHost>) -> Self {
        Self {
            backend,
            host,
            history: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Set how many history messages are sent with each request.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn host(&self) -> &Arc<ToolHost> {
        &self.host
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Send a user message and get the assistant's final answer.
    ///
    /// If the model asks for tools, they are executed and the model is asked
    /// again with their results. Tool failures are reported to the model, not
    /// returned; only backend failures are errors.
    pub async fn process_message(&mut self, user_input: &str) -> Result<String> {
        self.history.push(Message::user(user_input));

        let system = self.system_prompt().await;
        let start = self.history.len().saturating_sub(self.history_limit);
        let mut messages = self.history[start..].to_vec();

        let first = self.ask(&messages, &system).await?;

        let answer = match Reply::parse(&first) {
            Reply::NoCall => first,
            Reply::Calls(calls) => {
                let reports = self.execute(calls).await;
                let results = serde_json::to_string_pretty(&reports)
                    .unwrap_or_else(|e| format!("failed to encode tool results: {e}"));

                messages.push(Message::assistant(first));
                messages.push(Message::user(format!("Tool results: {results}")));
                self.ask(&messages, &system).await?
            }
        };

        self.history.push(Message::assistant(answer.clone()));
        Ok(answer)
    }

    async fn ask(&self, messages: &[Message], system: &str) -> Result<String> {
        let response = self
            .backend
            .chat(ChatRequest {
                messages,
                system: Some(system),
            })
            .await?;
        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model replied"
        );
        Ok(response.content)
    }

    /// Build the system prompt from the current tool menu.
    pub async fn system_prompt(&self) -> String {
        let tools = self.host.list_all_tools().await;
        if tools.is_empty() {
            return PLAIN_PROMPT.to_string();
        }

        let mut prompt = TOOL_PROMPT_HEADER.to_string();
        for registered in &tools {
            prompt.push_str(&menu_entry(registered));
        }
        prompt.push_str(TOOL_PROMPT_FOOTER);
        prompt
    }

    async fn execute(&self, calls: Vec<ToolCall>) -> Vec<ToolReport> {
        let mut reports = Vec::with_capacity(calls.len());
        for call in calls {
            reports.push(self.execute_one(call).await);
        }
        reports
    }

    async fn execute_one(&self, call: ToolCall) -> ToolReport {
        let provider = match call.provider.clone() {
            Some(provider) => Some(provider),
            None => self.host.find_tool(&call.name).await.map(|t| t.provider),
        };

        let mut report = ToolReport {
            tool: call.name.clone(),
            server: provider.clone(),
            params: call.params.clone(),
            result: None,
            error: None,
        };

        let Some(provider) = provider else {
            report.error = Some(Value::String(format!(
                "no provider offers tool '{}'",
                call.name
            )));
            return report;
        };

        tracing::info!(tool = %call.name, %provider, "executing tool call");
        match self.host.call_tool(&provider, &call.name, call.params).await {
            Ok(response) => {
                report.result = response.result;
                report.error = response
                    .error
                    .and_then(|e| serde_json::to_value(e).ok());
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, %provider, error = %e, "tool call failed");
                report.error = Some(Value::String(e.to_string()));
            }
        }
        report
    }
}

fn menu_entry(registered: &RegisteredTool) -> String {
    let tool = &registered.tool;
    let description = tool
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("No description");

    let mut entry = format!(
        "\n- {} (server: {}): {description}",
        tool.name, registered.provider
    );
    if !tool.input_schema.is_null() {
        let schema = serde_json::to_string_pretty(&tool.input_schema)
            .unwrap_or_else(|_| tool.input_schema.to_string());
        entry.push_str(&format!("\n  Schema: {schema}"));
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatResponse, Role, Usage};
    use crate::Error;
    use mcp::Tool;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays canned replies and records what it was sent.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(Error::Api("500: boom".into()))])),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LlmBackend for &Scripted {
        async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push(request.messages.to_vec());
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left")?;
            Ok(ChatResponse {
                content,
                usage: Usage::default(),
            })
        }
    }

    fn agent(backend: &Scripted) -> Agent<&Scripted> {
        Agent::new(backend, Arc::new(ToolHost::default()))
    }

    #[tokio::test]
    async fn plain_reply_is_returned() {
        let backend = Scripted::new(["Hello there."]);
        let mut agent = agent(&backend);

        let answer = agent.process_message("hi").await.unwrap();
        assert_eq!(answer, "Hello there.");
        assert_eq!(agent.history().len(), 2);
        assert_eq!(agent.history()[1].role, Role::Assistant);
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_triggers_second_request_with_results() {
        let backend = Scripted::new([
            "TOOL_CALL: list_channels\nSERVER: slack\nPARAMS: {\"limit\": 2}",
            "There are no channels.",
        ]);
        let mut agent = agent(&backend);

        let answer = agent.process_message("list channels").await.unwrap();
        assert_eq!(answer, "There are no channels.");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let follow_up = &seen[1];
        assert_eq!(follow_up.len(), 3);
        assert_eq!(follow_up[1].role, Role::Assistant);
        assert!(follow_up[2].content.starts_with("Tool results: "));
        assert!(follow_up[2].content.contains("provider not found: slack"));

        // Only the user message and the final answer are remembered.
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_without_server_is_reported() {
        let backend = Scripted::new(["TOOL_CALL: mystery", "done"]);
        let agent = agent(&backend);

        let reports = agent
            .execute(vec![ToolCall {
                name: "mystery".into(),
                provider: None,
                params: Map::new(),
            }])
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].server, None);
        assert_eq!(
            reports[0].error,
            Some(json!("no provider offers tool 'mystery'"))
        );
    }

    #[tokio::test]
    async fn history_is_truncated() {
        let replies: Vec<&'static str> = vec!["ok"; 6];
        let backend = Scripted::new(replies);
        let mut agent = agent(&backend).with_history_limit(4);

        for turn in 0..6 {
            agent.process_message(&format!("turn {turn}")).await.unwrap();
        }

        let seen = backend.seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.len(), 4);
        assert_eq!(last.last().unwrap().content, "turn 5");
        assert_eq!(agent.history().len(), 12);
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let backend = Scripted::failing();
        let mut agent = agent(&backend);
        let result = agent.process_message("hi").await;
        assert!(matches!(result, Err(Error::Api(_))));
    }

    #[tokio::test]
    async fn plain_prompt_without_tools() {
        let backend = Scripted::default();
        let agent = agent(&backend);
        assert_eq!(agent.system_prompt().await, PLAIN_PROMPT);
    }

    #[test]
    fn menu_entry_lists_schema() {
        let registered = RegisteredTool {
            tool: Tool {
                name: "echo".into(),
                description: Some("Echo input".into()),
                input_schema: json!({"type": "object"}),
            },
            provider: "stub".into(),
        };
        let entry = menu_entry(&registered);
        assert!(entry.starts_with("\n- echo (server: stub): Echo input"));
        assert!(entry.contains("Schema: {\n  \"type\": \"object\"\n}"));
    }

    #[test]
    fn menu_entry_without_description() {
        let registered = RegisteredTool {
            tool: Tool {
                name: "bare".into(),
                description: None,
                input_schema: Value::Null,
            },
            provider: "p".into(),
        };
        assert_eq!(menu_entry(&registered), "\n- bare (server: p): No description");
    }
}
