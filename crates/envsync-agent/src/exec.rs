//! # Shell Session Surface
//!
//! `envsync agent exec --root <path>` is what the Shell Transport runs over
//! ssh. One request per process:
//!
//! ```text
//! stdin  ──► AgentRequest (JSON, read to EOF)
//!                 │
//!                 ▼
//!          AgentService::handle
//!                 │
//! stdout ◄── AgentReply (JSON + newline)
//! ```
//!
//! Malformed input still produces a reply (`Error{invalid_request}`) so the
//! caller never has to parse an empty stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use envsync_core::{AgentReply, AgentRequest, ErrorCode};

use crate::error::AgentResult;
use crate::service::AgentService;

/// Reads one request from `reader`, answers it on `writer`.
pub async fn run<R, W>(service: &AgentService, mut reader: R, mut writer: W) -> AgentResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = Vec::new();
    reader.read_to_end(&mut input).await?;

    let reply = match serde_json::from_slice::<AgentRequest>(&input) {
        Ok(request) => {
            debug!(request = request.type_name(), bytes = input.len(), "Exec request");
            service.handle(request).await
        }
        Err(e) => AgentReply::Error {
            code: ErrorCode::InvalidRequest,
            message: format!("malformed request: {}", e),
        },
    };

    let mut output = serde_json::to_vec(&reply)?;
    output.push(b'\n');
    writer.write_all(&output).await?;
    writer.flush().await?;
    Ok(())
}
