//! Chat messages as sent by UI clients, and their conversion to provider
//! messages.

use crate::api::{ChatMessage, ChatToolCall, ContentPart, ImageUrl, MessageContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

const TOOL_PART_PREFIX: &str = "tool-";
const DYNAMIC_TOOL_PART: &str = "dynamic-tool";
const STATE_OUTPUT_AVAILABLE: &str = "output-available";
const STATE_OUTPUT_ERROR: &str = "output-error";

/// One entry of a UI message's `parts`. Tool parts are told apart by their
/// `toolCallId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Tool(ToolPart),
    Plain(PlainPart),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlainPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    File {
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Reasoning, step markers and anything newer.
    #[serde(other)]
    Unknown,
}

/// A `tool-<name>` or `dynamic-tool` part: a tool call the assistant made
/// earlier, with its outcome once known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ToolPart {
    pub fn name(&self) -> Option<&str> {
        if self.kind == DYNAMIC_TOOL_PART {
            return self.tool_name.as_deref();
        }
        self.kind
            .strip_prefix(TOOL_PART_PREFIX)
            .filter(|name| !name.is_empty())
    }

    /// What the model sees as the tool's answer. `None` while the call is
    /// still pending.
    fn result_text(&self) -> Option<String> {
        match self.state.as_str() {
            STATE_OUTPUT_AVAILABLE => Some(tool_output_text(&self.output)),
            STATE_OUTPUT_ERROR => Some(format!(
                "Error: {}",
                self.error_text.as_deref().unwrap_or("tool failed")
            )),
            _ => None,
        }
    }

    /// The call and its result, for completed calls only.
    fn to_api(&self) -> Option<(ChatToolCall, ChatMessage)> {
        let name = self.name()?;
        let result = self.result_text()?;
        let arguments = match &self.input {
            Value::Null => "{}".to_string(),
            Value::String(raw) => raw.clone(),
            input => input.to_string(),
        };
        Some((
            ChatToolCall::function(&self.tool_call_id, name, arguments),
            ChatMessage::tool_result(&self.tool_call_id, result),
        ))
    }
}

/// Tool output as text for a `role: "tool"` message.
pub fn tool_output_text(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A message as posted by a UI client: either plain `content` or `parts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

/// Text-only history entry sent to the hosted chatbot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl UiMessage {
    pub fn text_message(role: &str, text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: role.to_string(),
            content: Some(text.into()),
            parts: Vec::new(),
        }
    }

    /// `content` followed by every text part.
    pub fn text(&self) -> String {
        let mut segments: Vec<&str> = Vec::new();
        if let Some(content) = self.content.as_deref() {
            segments.push(content);
        }
        for part in &self.parts {
            if let MessagePart::Plain(PlainPart::Text { text }) = part {
                segments.push(text);
            }
        }
        segments.join("\n")
    }

    fn has_files(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, MessagePart::Plain(PlainPart::File { .. })))
    }

    fn has_finished_tool_calls(&self) -> bool {
        self.parts.iter().any(|part| match part {
            MessagePart::Tool(tool) => tool.to_api().is_some(),
            MessagePart::Plain(_) => false,
        })
    }

    fn to_api_messages(&self) -> Vec<ChatMessage> {
        let role = match self.role.as_str() {
            ROLE_SYSTEM | ROLE_USER => self.role.as_str(),
            ROLE_ASSISTANT if self.has_finished_tool_calls() => {
                return self.assistant_turns();
            }
            ROLE_ASSISTANT => ROLE_ASSISTANT,
            _ => return Vec::new(),
        };

        if !self.has_files() {
            let text = self.text();
            if text.trim().is_empty() {
                return Vec::new();
            }
            return vec![ChatMessage::text(role, text)];
        }

        let mut parts = Vec::new();
        if let Some(content) = self.content.as_ref().filter(|c| !c.trim().is_empty()) {
            parts.push(ContentPart::Text {
                text: content.clone(),
            });
        }
        for part in &self.parts {
            let MessagePart::Plain(part) = part else {
                continue;
            };
            match part {
                PlainPart::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
                PlainPart::File {
                    media_type, url, ..
                } if media_type.starts_with("image/") => parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                }),
                PlainPart::File {
                    media_type,
                    url,
                    filename,
                } => parts.push(ContentPart::Text {
                    text: format!(
                        "[Attached file: {} ({})]",
                        filename.as_deref().unwrap_or(url),
                        media_type
                    ),
                }),
                PlainPart::Unknown => {}
            }
        }

        vec![ChatMessage {
            role: role.to_string(),
            content: Some(MessageContent::Parts(parts)),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }]
    }

    /// Splits an assistant message into `tool_calls` messages, each followed
    /// by its `role: "tool"` results. Text written before a batch of calls
    /// travels with that batch.
    fn assistant_turns(&self) -> Vec<ChatMessage> {
        let mut turns = Vec::new();
        let mut text: Vec<String> = self
            .content
            .iter()
            .filter(|content| !content.trim().is_empty())
            .cloned()
            .collect();
        let mut calls = Vec::new();
        let mut results = Vec::new();

        for part in &self.parts {
            match part {
                MessagePart::Tool(tool) => {
                    if let Some((call, result)) = tool.to_api() {
                        calls.push(call);
                        results.push(result);
                    }
                }
                MessagePart::Plain(PlainPart::Text { text: segment }) => {
                    if !calls.is_empty() {
                        flush_tool_batch(&mut turns, &mut text, &mut calls, &mut results);
                    }
                    if !segment.trim().is_empty() {
                        text.push(segment.clone());
                    }
                }
                MessagePart::Plain(_) => {}
            }
        }

        if !calls.is_empty() {
            flush_tool_batch(&mut turns, &mut text, &mut calls, &mut results);
        } else if !text.is_empty() {
            turns.push(ChatMessage::text(ROLE_ASSISTANT, text.join("\n")));
        }
        turns
    }
}

fn flush_tool_batch(
    turns: &mut Vec<ChatMessage>,
    text: &mut Vec<String>,
    calls: &mut Vec<ChatToolCall>,
    results: &mut Vec<ChatMessage>,
) {
    let content = (!text.is_empty()).then(|| text.join("\n"));
    text.clear();
    turns.push(ChatMessage::assistant_tool_calls(
        content,
        std::mem::take(calls),
    ));
    turns.append(results);
}

/// Converts UI history to provider messages, dropping roles and messages
/// that carry nothing a provider accepts.
pub fn to_api_messages(messages: &[UiMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .flat_map(UiMessage::to_api_messages)
        .collect()
}

pub fn to_chat_turns(messages: &[UiMessage]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter(|message| message.role == ROLE_USER || message.role == ROLE_ASSISTANT)
        .map(|message| ChatTurn {
            role: message.role.clone(),
            content: message.text(),
        })
        .filter(|turn| !turn.content.trim().is_empty())
        .collect()
}

pub fn latest_user_text(messages: &[UiMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == ROLE_USER)
        .map(|message| message.text().trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> UiMessage {
        serde_json::from_value(value).expect("message should parse")
    }

    #[test]
    fn parts_and_content_both_parse() {
        let message = parse(json!({
            "id": "m1",
            "role": "user",
            "parts": [
                { "type": "step-start" },
                { "type": "text", "text": "Hello" },
                { "type": "file", "mediaType": "image/png", "url": "data:image/png;base64,AA" }
            ]
        }));
        assert_eq!(message.parts.len(), 3);
        assert_eq!(message.parts[0], MessagePart::Plain(PlainPart::Unknown));
        assert_eq!(message.text(), "Hello");

        let plain = parse(json!({ "role": "assistant", "content": "Hi" }));
        assert_eq!(plain.text(), "Hi");
    }

    #[test]
    fn text_only_messages_become_plain_content() {
        let messages = vec![
            UiMessage::text_message("system", "Be kind"),
            parse(json!({ "role": "user", "parts": [{ "type": "text", "text": "Hi" }] })),
            parse(json!({ "role": "data", "content": "ignored" })),
            UiMessage::text_message("assistant", "   "),
        ];
        let converted = to_api_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0], ChatMessage::text("system", "Be kind"));
        assert_eq!(converted[1], ChatMessage::text("user", "Hi"));
    }

    #[test]
    fn files_become_content_parts() {
        let message = parse(json!({
            "role": "user",
            "parts": [
                { "type": "text", "text": "Compare these" },
                { "type": "file", "mediaType": "image/jpeg", "url": "https://x/cat.jpg" },
                {
                    "type": "file",
                    "mediaType": "application/pdf",
                    "url": "https://x/a.pdf",
                    "filename": "a.pdf"
                }
            ]
        }));
        let converted = to_api_messages(&[message]);
        assert_eq!(
            serde_json::to_value(&converted[0]).unwrap(),
            json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": "Compare these" },
                    { "type": "image_url", "image_url": { "url": "https://x/cat.jpg" } },
                    { "type": "text", "text": "[Attached file: a.pdf (application/pdf)]" }
                ]
            })
        );
    }

    #[test]
    fn client_tool_results_reach_the_model() {
        let messages = vec![
            UiMessage::text_message("user", "When is my meeting?"),
            parse(json!({
                "role": "assistant",
                "parts": [
                    { "type": "step-start" },
                    {
                        "type": "tool-pick_date",
                        "toolCallId": "call_9",
                        "state": "output-available",
                        "input": { "range": "next week" },
                        "output": { "date": "2026-10-20" }
                    }
                ]
            })),
        ];
        let converted = to_api_messages(&messages);
        assert_eq!(
            serde_json::to_value(&converted).unwrap(),
            json!([
                { "role": "user", "content": "When is my meeting?" },
                {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "pick_date",
                            "arguments": "{\"range\":\"next week\"}"
                        }
                    }]
                },
                { "role": "tool", "content": "{\"date\":\"2026-10-20\"}", "tool_call_id": "call_9" }
            ])
        );
    }

    #[test]
    fn tool_batches_keep_text_order_and_skip_pending_calls() {
        let message = parse(json!({
            "role": "assistant",
            "parts": [
                { "type": "text", "text": "Let me check." },
                {
                    "type": "dynamic-tool",
                    "toolName": "search",
                    "toolCallId": "call_1",
                    "state": "output-error",
                    "input": {},
                    "errorText": "timed out"
                },
                { "type": "text", "text": "Trying the calendar." },
                {
                    "type": "tool-calendar",
                    "toolCallId": "call_2",
                    "state": "output-available",
                    "output": "free at 10"
                },
                {
                    "type": "tool-pick_date",
                    "toolCallId": "call_3",
                    "state": "input-available",
                    "input": {}
                },
                { "type": "text", "text": "You are free at 10." }
            ]
        }));
        let converted = to_api_messages(&[message]);
        assert_eq!(converted.len(), 5);

        assert_eq!(
            converted[0].content,
            Some(MessageContent::Text("Let me check.".to_string()))
        );
        let first_calls = converted[0].tool_calls.as_ref().expect("calls");
        assert_eq!(first_calls.len(), 1);
        assert_eq!(first_calls[0].function.name, "search");
        assert_eq!(
            converted[1],
            ChatMessage::tool_result("call_1", "Error: timed out")
        );

        let second_calls = converted[2].tool_calls.as_ref().expect("calls");
        assert_eq!(second_calls.len(), 1);
        assert_eq!(second_calls[0].function.arguments, "{}");
        assert_eq!(
            converted[3],
            ChatMessage::tool_result("call_2", "free at 10")
        );

        assert_eq!(
            converted[4],
            ChatMessage::text("assistant", "You are free at 10.")
        );
    }

    #[test]
    fn pending_tool_parts_leave_plain_text() {
        let message = parse(json!({
            "role": "assistant",
            "parts": [
                { "type": "text", "text": "One moment." },
                { "type": "tool-pick_date", "toolCallId": "call_3", "state": "input-available" }
            ]
        }));
        assert!(matches!(message.parts[1], MessagePart::Tool(_)));
        assert_eq!(
            to_api_messages(&[message]),
            vec![ChatMessage::text("assistant", "One moment.")]
        );
    }

    #[test]
    fn latest_user_text_skips_assistant_turns() {
        let messages = vec![
            UiMessage::text_message("user", "first"),
            UiMessage::text_message("assistant", "reply"),
            UiMessage::text_message("user", "  second  "),
            UiMessage::text_message("assistant", "pending"),
        ];
        assert_eq!(latest_user_text(&messages).as_deref(), Some("second"));
        assert_eq!(latest_user_text(&messages[1..2]), None);

        let turns = to_chat_turns(&messages);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, "assistant");
    }
}
