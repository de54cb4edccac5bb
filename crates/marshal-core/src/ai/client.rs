//! The `ModelClient` trait — the single seam to the upstream model.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::UpstreamError;
use super::types::{ModelOutput, ModelRequest, StreamPart};

/// Opaque model invocation. Implementations must honor the cancellation
/// token: a cancelled call returns `UpstreamError::Cancelled` promptly
/// rather than waiting out the upstream.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelOutput, UpstreamError>;

    /// Streaming variant. The default adapter runs `invoke` and replays the
    /// complete output as stream parts; providers with native streaming
    /// should override it.
    async fn invoke_streaming(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, UpstreamError> {
        let output = self.invoke(request, cancel).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        if !output.text.is_empty() {
            let _ = tx.send(StreamPart::TextDelta { delta: output.text });
        }
        for call in output.tool_calls {
            let _ = tx.send(StreamPart::ToolCall { call });
        }
        let _ = tx.send(StreamPart::Usage {
            usage: output.usage,
        });
        Ok(rx)
    }
}
