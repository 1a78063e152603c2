use super::streamable_http::{
    initialize_session, is_event_stream_content_type, response_content_type, sse_data_payload,
    HttpChannel, SseLineBuffer,
};
use super::{ToolTransport, TransportKind, TransportResponse};
use crate::mcp::client::protocol::JsonRpcRequest;
use crate::mcp::errors::TransportError;
use crate::mcp::registry::ToolSessionConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

/// SSE transport: the response body is consumed as an event stream and
/// reading stops once the frame answering the request has arrived.
pub struct SseTransport {
    channel: HttpChannel,
}

impl SseTransport {
    pub async fn connect(
        client: reqwest::Client,
        config: &ToolSessionConfig,
    ) -> Result<Self, TransportError> {
        let transport = Self {
            channel: HttpChannel::new(client, config),
        };
        initialize_session(&transport, &transport.channel).await?;
        Ok(transport)
    }
}

/// Server-initiated requests and notifications carry no `result`/`error`
/// and are skipped while waiting for the response frame.
fn is_response_frame(payload: &str) -> bool {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => {
            if map.contains_key("result") || map.contains_key("error") {
                return true;
            }
            !map.contains_key("method")
        }
        _ => true,
    }
}

#[async_trait]
impl ToolTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<TransportResponse, TransportError> {
        let response = self.channel.send(request).await?;
        let status = response.status().as_u16();
        let content_type = response_content_type(&response);

        let streaming = response.status().is_success()
            && content_type
                .as_deref()
                .is_some_and(is_event_stream_content_type);
        if !streaming {
            let body = response
                .text()
                .await
                .map_err(|err| self.channel.request_error(err))?;
            return Ok(TransportResponse {
                status,
                content_type,
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();
        let mut body = String::new();

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| self.channel.request_error(err))?;
            for line in buffer.push(&chunk) {
                if let Some(payload) = sse_data_payload(&line) {
                    if payload.is_empty() {
                        continue;
                    }
                    if !is_response_frame(payload) {
                        debug!(url = %self.channel.url(), "Skipping server-initiated SSE frame");
                        continue;
                    }
                    body.push_str("data: ");
                    body.push_str(payload);
                    body.push_str("\n\n");
                    break 'read;
                }
            }
        }
        if body.is_empty() {
            for line in buffer.finish() {
                if let Some(payload) = sse_data_payload(&line) {
                    if !payload.is_empty() && is_response_frame(payload) {
                        body.push_str("data: ");
                        body.push_str(payload);
                        body.push_str("\n\n");
                        break;
                    }
                }
            }
        }

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::is_response_frame;

    #[test]
    fn response_frames_carry_result_or_error() {
        assert!(is_response_frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
        assert!(is_response_frame(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"x"}}"#
        ));
        assert!(!is_response_frame(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#
        ));
        assert!(is_response_frame("not json"));
    }
}
