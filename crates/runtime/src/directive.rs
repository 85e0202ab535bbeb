//! Tool-call directives scraped from model output.
//!
//! The model is told to request tools with a small line protocol:
//!
//! ```text
//! TOOL_CALL: tool_name
//! SERVER: provider_name
//! PARAMS: {"key": "value"}
//! ```
//!
//! `SERVER:` and `PARAMS:` are looked for in the three lines that follow a
//! `TOOL_CALL:` line, in any order.

use serde::Serialize;
use serde_json::{Map, Value};

const TOOL_CALL: &str = "TOOL_CALL:";
const SERVER: &str = "SERVER:";
const PARAMS: &str = "PARAMS:";
const LOOKAHEAD: usize = 3;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    /// Provider named by `SERVER:`, if the model gave one.
    pub provider: Option<String>,
    pub params: Map<String, Value>,
}

/// What a model reply asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    NoCall,
    Calls(Vec<ToolCall>),
}

impl Reply {
    /// Scan a model reply for tool-call directives.
    ///
    /// Directives whose `PARAMS:` line is not a JSON object are logged and
    /// skipped; scanning continues with the next line.
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut calls = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            let Some(name) = lines[i].strip_prefix(TOOL_CALL) else {
                i += 1;
                continue;
            };

            let mut call = ToolCall {
                name: name.trim().to_string(),
                provider: None,
                params: Map::new(),
            };
            let mut valid = !call.name.is_empty();

            let end = (i + 1 + LOOKAHEAD).min(lines.len());
            let mut j = i + 1;
            while j < end && !lines[j].starts_with(TOOL_CALL) {
                if let Some(server) = lines[j].strip_prefix(SERVER) {
                    call.provider = Some(server.trim().to_string()).filter(|s| !s.is_empty());
                } else if let Some(raw) = lines[j].strip_prefix(PARAMS) {
                    match parse_params(raw.trim()) {
                        Ok(params) => call.params = params,
                        Err(reason) => {
                            tracing::warn!(tool = %call.name, %reason, "skipping tool call");
                            valid = false;
                        }
                    }
                }
                j += 1;
            }

            if valid {
                calls.push(call);
            }
            i = j;
        }

        if calls.is_empty() {
            Reply::NoCall
        } else {
            Reply::Calls(calls)
        }
    }
}

fn parse_params(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(other) => Err(format!("params must be a JSON object, got {other}")),
        Err(e) => Err(format!("invalid params JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calls(text: &str) -> Vec<ToolCall> {
        match Reply::parse(text) {
            Reply::Calls(calls) => calls,
            Reply::NoCall => Vec::new(),
        }
    }

    #[test]
    fn plain_text_is_no_call() {
        assert_eq!(Reply::parse("The answer is 42."), Reply::NoCall);
        assert_eq!(Reply::parse(""), Reply::NoCall);
    }

    #[test]
    fn parses_full_directive() {
        let text = "Let me check.\nTOOL_CALL: list_channels\nSERVER: slack\nPARAMS: {\"limit\": 5}";
        let parsed = calls(text);
        assert_eq!(
            parsed,
            [ToolCall {
                name: "list_channels".into(),
                provider: Some("slack".into()),
                params: json!({"limit": 5}).as_object().cloned().unwrap(),
            }]
        );
    }

    #[test]
    fn server_is_optional() {
        let parsed = calls("TOOL_CALL: echo\nPARAMS: {\"x\": 1}");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].provider, None);
        assert_eq!(parsed[0].params["x"], 1);
    }

    #[test]
    fn missing_params_default_to_empty() {
        let parsed = calls("TOOL_CALL: ping\nSERVER: net");
        assert_eq!(parsed[0].name, "ping");
        assert!(parsed[0].params.is_empty());
    }

    #[test]
    fn malformed_params_skip_only_that_call() {
        let text = "TOOL_CALL: broken\nSERVER: a\nPARAMS: {not json}\n\
                    TOOL_CALL: fine\nSERVER: b\nPARAMS: {\"ok\": true}";
        let parsed = calls(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "fine");
        assert_eq!(parsed[0].provider.as_deref(), Some("b"));
    }

    #[test]
    fn non_object_params_are_rejected() {
        assert_eq!(Reply::parse("TOOL_CALL: t\nPARAMS: [1, 2]"), Reply::NoCall);
    }

    #[test]
    fn lookahead_is_bounded() {
        let text = "TOOL_CALL: far\n\n\n\nSERVER: too-late";
        let parsed = calls(text);
        assert_eq!(parsed[0].provider, None);
    }

    #[test]
    fn indented_directive_is_accepted() {
        let parsed = calls("Sure:\n    TOOL_CALL: ping\n    SERVER: net");
        assert_eq!(parsed[0].name, "ping");
        assert_eq!(parsed[0].provider.as_deref(), Some("net"));
    }

    #[test]
    fn adjacent_directives_both_parse() {
        let parsed = calls("TOOL_CALL: first\nTOOL_CALL: second\nSERVER: s");
        let names: Vec<_> = parsed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(parsed[1].provider.as_deref(), Some("s"));
    }
}
