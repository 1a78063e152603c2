//! Exposes the hosted chatbot to the model as an ordinary tool.

use super::{ToolDescriptor, ToolExecutor};
use crate::core::chatbot::ChatbotClient;
use crate::mcp::errors::ToolCallError;
use serde_json::{json, Value};
use std::sync::Arc;

pub const CHATBOT_TOOL_NAME: &str = "ask_chatbot";

fn question_from(arguments: &Value) -> Result<String, ToolCallError> {
    let question = arguments
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if question.is_empty() {
        return Err(ToolCallError::InvalidArguments(
            "`question` must be a non-empty string".to_string(),
        ));
    }
    Ok(question.to_string())
}

pub fn chatbot_tool(client: ChatbotClient) -> ToolDescriptor {
    let client = Arc::new(client);
    let executor: ToolExecutor = Arc::new(move |arguments: Value| {
        let client = Arc::clone(&client);
        Box::pin(async move {
            let question = question_from(&arguments)?;
            let answer = client
                .ask(&question, &[])
                .await
                .map_err(|err| ToolCallError::Chatbot(err.to_string()))?;
            Ok(json!({ "answer": answer }))
        })
    });

    ToolDescriptor {
        description: Some(
            "Ask the hosted knowledge-base chatbot a question and get its answer.".to_string(),
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask the chatbot."
                }
            },
            "required": ["question"]
        }),
        executor: Some(executor),
    }
}
