//! JSON-RPC stdio framing: `Content-Length: <n>\r\n\r\n<json>`.
//!
//! A malformed header or payload surfaces as [`Error::Protocol`]; the reader
//! has consumed the offending bytes by then, so the caller can log and keep
//! reading the stream.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Upper bound on a declared frame body. Headers claiming more than this
/// are rejected before any buffer is allocated for them.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one framed message.
pub async fn write_frame<W>(writer: &mut W, payload: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(payload)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Ok(None)` means the stream ended cleanly at a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line: {trimmed:?}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(value.trim().parse().map_err(|_| {
                Error::Protocol(format!("bad Content-Length value: {:?}", value.trim()))
            })?);
        }
        // Other headers (Content-Type) are ignored.
    }

    let len =
        content_length.ok_or_else(|| Error::Protocol("missing Content-Length header".into()))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "Content-Length {len} exceeds the {MAX_FRAME_LEN}-byte frame limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid JSON payload: {e}")))
}
