//! UI message stream: the `data: <json>\n\n` framing consumed by chat
//! renderers, terminated by `data: [DONE]\n\n`.
//!
//! Model runs produce these events natively. A finished chatbot answer is
//! replayed through [`encode`] so clients decode both paths the same way.

use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::pin::Pin;

pub const DEFAULT_MESSAGE_ID: &str = "0";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub const CONTENT_TYPE: &str = "text/event-stream";
pub const CACHE_CONTROL: &str = "no-cache";
pub const CONNECTION: &str = "keep-alive";
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_MESSAGE_STREAM_VERSION: &str = "v1";

pub type ChatStream = Pin<Box<dyn Stream<Item = UiStreamEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiStreamEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error_text: String,
    },
    FinishStep,
    #[serde(rename_all = "camelCase")]
    Finish {
        finish_reason: FinishReason,
    },
}

pub fn encode_event(event: &UiStreamEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|err| {
        json!({ "type": "error", "errorText": err.to_string() }).to_string()
    });
    format!("data: {}\n\n", payload)
}

/// The event sequence for one complete text answer.
pub fn text_answer_events(text: &str, message_id: Option<&str>) -> Vec<UiStreamEvent> {
    let id = message_id.unwrap_or(DEFAULT_MESSAGE_ID).to_string();
    vec![
        UiStreamEvent::Start { message_id: None },
        UiStreamEvent::StartStep,
        UiStreamEvent::TextStart { id: id.clone() },
        UiStreamEvent::TextDelta {
            id: id.clone(),
            delta: text.to_string(),
        },
        UiStreamEvent::TextEnd { id },
        UiStreamEvent::FinishStep,
        UiStreamEvent::Finish {
            finish_reason: FinishReason::Stop,
        },
    ]
}

/// Encodes a finished answer as a complete stream body. The text is sent as
/// a single delta.
pub fn encode(text: &str, message_id: Option<&str>) -> String {
    let mut body: String = text_answer_events(text, message_id)
        .iter()
        .map(encode_event)
        .collect();
    body.push_str(DONE_FRAME);
    body
}

pub fn answer_stream(text: &str, message_id: Option<&str>) -> ChatStream {
    Box::pin(stream::iter(text_answer_events(text, message_id)))
}

/// Frames a live event stream and appends the terminal `[DONE]` frame.
pub fn event_stream_body(
    events: ChatStream,
) -> impl Stream<Item = Result<String, Infallible>> + Send {
    events
        .map(|event| encode_event(&event))
        .chain(stream::once(async { DONE_FRAME.to_string() }))
        .map(Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(body: &str) -> Vec<&str> {
        body.split("\n\n")
            .filter(|frame| !frame.is_empty())
            .collect()
    }

    fn frame_json(frame: &str) -> Value {
        let payload = frame.strip_prefix("data: ").expect("data prefix");
        serde_json::from_str(payload).expect("frame should be JSON")
    }

    #[test]
    fn encode_emits_fixed_frame_sequence() {
        let body = encode("Hello", Some("42"));
        let frames = frames(&body);
        assert_eq!(frames.len(), 8);

        let types: Vec<Value> = frames[..7]
            .iter()
            .map(|frame| frame_json(frame)["type"].clone())
            .collect();
        assert_eq!(
            types,
            vec![
                json!("start"),
                json!("start-step"),
                json!("text-start"),
                json!("text-delta"),
                json!("text-end"),
                json!("finish-step"),
                json!("finish"),
            ]
        );
        assert_eq!(frame_json(frames[0]), json!({ "type": "start" }));
        assert_eq!(
            frame_json(frames[3]),
            json!({ "type": "text-delta", "id": "42", "delta": "Hello" })
        );
        assert_eq!(
            frame_json(frames[6]),
            json!({ "type": "finish", "finishReason": "stop" })
        );
        assert_eq!(frames[7], "data: [DONE]");
        assert!(body.ends_with(DONE_FRAME));
    }

    #[test]
    fn encode_defaults_message_id() {
        let body = encode("Hi", None);
        let frames = frames(&body);
        assert_eq!(
            frame_json(frames[2]),
            json!({ "type": "text-start", "id": "0" })
        );
        assert_eq!(
            frame_json(frames[4]),
            json!({ "type": "text-end", "id": "0" })
        );
    }

    #[test]
    fn multi_line_text_stays_in_one_frame() {
        let body = encode("line one\n\nline two", None);
        assert_eq!(frames(&body).len(), 8);
        let delta = frame_json(frames(&body)[3]);
        assert_eq!(delta["delta"], json!("line one\n\nline two"));
    }

    #[test]
    fn tool_events_use_camel_case_fields() {
        let input = encode_event(&UiStreamEvent::ToolInputAvailable {
            tool_call_id: "call_1".to_string(),
            tool_name: "search".to_string(),
            input: json!({ "q": "rust" }),
        });
        assert_eq!(
            frame_json(input.trim_end()),
            json!({
                "type": "tool-input-available",
                "toolCallId": "call_1",
                "toolName": "search",
                "input": { "q": "rust" }
            })
        );

        let finish = encode_event(&UiStreamEvent::Finish {
            finish_reason: FinishReason::ToolCalls,
        });
        assert_eq!(
            frame_json(finish.trim_end()),
            json!({ "type": "finish", "finishReason": "tool-calls" })
        );
    }

    #[tokio::test]
    async fn live_stream_matches_encoded_answer() {
        let chunks: Vec<String> = event_stream_body(answer_stream("Hello", Some("7")))
            .map(|chunk| chunk.unwrap_or_else(|never| match never {}))
            .collect()
            .await;
        assert_eq!(chunks.concat(), encode("Hello", Some("7")));
    }
}
