//! Wire framing for MCP stdio transports.
//!
//! Two framings are supported, selected per server:
//!
//! - [`McpFraming::ContentLength`] (MCP default):
//!   `Content-Length: N\r\n\r\n<N bytes of JSON>`
//! - [`McpFraming::Jsonl`]: one JSON object per line
//!
//! Frames larger than [`MAX_FRAME_BYTES`] are rejected rather than
//! buffered.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use clawgate_types::config::McpFraming;

use crate::error::{Result, ServiceError};

/// Upper bound on a single frame.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Encode one frame for writing.
pub fn encode_frame(payload: &[u8], framing: McpFraming) -> Vec<u8> {
    match framing {
        McpFraming::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", payload.len());
            let mut out = Vec::with_capacity(header.len() + payload.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(payload);
            out
        }
        McpFraming::Jsonl => {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.extend_from_slice(payload);
            out.push(b'\n');
            out
        }
    }
}

/// Read one frame. `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R, framing: McpFraming) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        McpFraming::ContentLength => read_content_length_frame(reader).await,
        McpFraming::Jsonl => read_jsonl_frame(reader).await,
    }
}

async fn read_content_length_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    // Header block: lines up to the blank separator.
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(ServiceError::McpTransport(
                    "eof inside frame header".into(),
                ))
            };
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed
            .split_once(':')
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value.trim())
        {
            let length: usize = value.parse().map_err(|_| {
                ServiceError::McpProtocol(format!("bad Content-Length: {value}"))
            })?;
            if length > MAX_FRAME_BYTES {
                return Err(ServiceError::McpProtocol(format!(
                    "frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
                )));
            }
            content_length = Some(length);
        }
        // Other headers (Content-Type) are ignored.
    }

    let length = content_length.ok_or_else(|| {
        ServiceError::McpProtocol("frame header missing Content-Length".into())
    })?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        ServiceError::McpTransport(format!("eof inside frame body: {e}"))
    })?;
    Ok(Some(body))
}

async fn read_jsonl_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.len() > MAX_FRAME_BYTES {
            return Err(ServiceError::McpProtocol(format!(
                "line of {} bytes exceeds the {MAX_FRAME_BYTES} byte limit",
                line.len()
            )));
        }
        while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        return Ok(Some(line));
    }
}
