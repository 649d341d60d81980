//! Stdio transport: JSON-RPC lines on stdin, responses on stdout.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::ProtocolHandler;
use crate::types::{McpResult, RequestId};

use super::framing;

pub struct StdioTransport {
    handler: ProtocolHandler,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self { handler }
    }

    pub async fn run(&self) -> McpResult<()> {
        tracing::info!("Stdio transport started");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until the reader reaches EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                tracing::info!("EOF on input, shutting down");
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = match framing::parse_message(&line) {
                Ok(msg) => self.handler.handle_message(msg).await,
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    Some(serde_json::to_value(e.to_json_rpc_error(RequestId::Null))?)
                }
            };

            if let Some(response) = response {
                let framed = framing::frame_message(&response)?;
                writer.write_all(framed.as_bytes()).await?;
                writer.flush().await?;
            }
        }
    }
}
