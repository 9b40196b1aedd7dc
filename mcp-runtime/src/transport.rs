//! Stdio framing. Accepts newline-delimited JSON and `Content-Length` framed
//! messages, detected per message; replies reuse the framing of the request.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    Line,
}

/// One inbound message. A body that is not JSON, or a header block without a
/// usable `Content-Length`, is still a message: the server answers it with a
/// parse error instead of dropping the connection.
#[derive(Debug)]
pub struct InboundMessage {
    pub framing: Framing,
    pub payload: Result<Value, FrameError>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing Content-Length header")]
    MissingContentLength,
    #[error("Invalid Content-Length header: {0}")]
    InvalidContentLength(String),
}

/// Read the next message, or `None` at a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<InboundMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let first = loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            break trimmed.to_string();
        }
    };

    if !is_header_line(&first) {
        return Ok(Some(InboundMessage {
            framing: Framing::Line,
            payload: serde_json::from_str(&first).map_err(FrameError::from),
        }));
    }

    // Header order is free; Content-Length may sit anywhere in the block.
    let mut length = content_length(&first);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(parsed) = content_length(line) {
            length = Some(parsed);
        }
    }

    let length = match length {
        Some(Ok(length)) => length,
        Some(Err(raw)) => return Ok(Some(header_failure(FrameError::InvalidContentLength(raw)))),
        None => return Ok(Some(header_failure(FrameError::MissingContentLength))),
    };
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(InboundMessage {
        framing: Framing::ContentLength,
        payload: serde_json::from_slice(&body).map_err(FrameError::from),
    }))
}

/// The header block is already consumed; without a length there is no body
/// to skip, so reading resumes at the next line.
fn header_failure(error: FrameError) -> InboundMessage {
    InboundMessage {
        framing: Framing::ContentLength,
        payload: Err(error),
    }
}

/// `Name: value` with a token-like name. JSON never matches: it opens with a
/// bracket, and a quoted key puts a quote before the colon.
fn is_header_line(line: &str) -> bool {
    if line.starts_with(['{', '[']) {
        return false;
    }
    let Some((name, _)) = line.split_once(':') else {
        return false;
    };
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `None` when the line is some other header; `Err` carries the raw value.
fn content_length(line: &str) -> Option<Result<usize, String>> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    let value = value.trim();
    Some(value.parse::<usize>().map_err(|_| value.to_string()))
}

pub async fn write_message<W>(writer: &mut W, framing: Framing, value: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await
}
