use super::streamable_http::{initialize_session, response_content_type, HttpChannel};
use super::{ToolTransport, TransportKind, TransportResponse};
use crate::mcp::client::protocol::JsonRpcRequest;
use crate::mcp::errors::TransportError;
use crate::mcp::registry::ToolSessionConfig;
use async_trait::async_trait;

/// Streamable HTTP transport: one POST per envelope, full body buffered.
pub struct HttpTransport {
    channel: HttpChannel,
}

impl HttpTransport {
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

#[async_trait]
impl ToolTransport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<TransportResponse, TransportError> {
        let response = self.channel.send(request).await?;
        let status = response.status().as_u16();
        let content_type = response_content_type(&response);
        let body = response
            .text()
            .await
            .map_err(|err| self.channel.request_error(err))?;
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
