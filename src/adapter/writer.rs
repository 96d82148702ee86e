//! HTTP/1.1 serialization of an [`OutgoingResponse`] onto a connection.
//!
//! The head is written first, then the body is pumped one chunk at a time:
//! a chunk is written and flushed before the next one is pulled.

use bytes::{BufMut, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::AdapterError;
use crate::http::{Headers, OutgoingResponse, status_forbids_body};

// Framing headers owned by the adapter; handler-supplied copies are dropped.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding"];

/// How body bytes are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body bytes may follow the head.
    None,
    /// Raw bytes, exactly this many.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Tracks whether any head bytes reached the connection.
#[derive(Debug, Default)]
pub(crate) struct WriteProgress {
    pub head_started: bool,
    pub body_bytes: u64,
}

/// Writes `response` to `io` and shuts the write side down.
///
/// With `omit_body` (HEAD requests) the head is written unchanged, including
/// any `Content-Length`, and the body source is dropped without being pulled.
///
/// Returns the status code written.
pub(crate) async fn write_response<W>(
    io: &mut W,
    mut response: OutgoingResponse,
    omit_body: bool,
    progress: &mut WriteProgress,
) -> Result<u16, AdapterError>
where
    W: AsyncWrite + Unpin,
{
    let status = response.status();
    let source = response.take_body();

    let mut headers = Headers::with_capacity(response.headers().len() + 2);
    for (name, value) in response.headers().iter() {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        if !valid_name(name) || !valid_value(value) {
            return Err(AdapterError::InvalidHeader {
                name: name.to_owned(),
            });
        }
        headers.insert(name, value);
    }

    let framing = if status_forbids_body(status) {
        Framing::None
    } else if let Some(raw) = headers.get("content-length") {
        let declared = raw
            .trim()
            .parse()
            .map_err(|_| AdapterError::InvalidHeader {
                name: "Content-Length".to_owned(),
            })?;
        Framing::Length(declared)
    } else if source.is_some() {
        headers.insert("Transfer-Encoding", "chunked");
        Framing::Chunked
    } else {
        headers.insert("Content-Length", "0");
        Framing::Length(0)
    };
    headers.insert("Connection", "close");

    // Nothing would ever fill a declared length without a body source.
    if let Framing::Length(declared) = framing {
        if declared > 0 && source.is_none() && !omit_body {
            return Err(AdapterError::LengthMismatch {
                declared,
                produced: 0,
            });
        }
    }

    let phrase = response.reason_phrase();
    if !valid_value(phrase) {
        return Err(AdapterError::InvalidStatusText {
            text: phrase.to_owned(),
        });
    }

    let head = encode_head(status, phrase, &headers);
    progress.head_started = true;
    io.write_all(&head).await.map_err(AdapterError::Write)?;

    match source {
        Some(source) if !omit_body && framing != Framing::None => {
            pump_body(io, source, framing, progress).await?;
        }
        _ => {}
    }

    io.flush().await.map_err(AdapterError::Write)?;
    io.shutdown().await.map_err(AdapterError::Write)?;
    Ok(status)
}

async fn pump_body<W>(
    io: &mut W,
    mut source: crate::http::ChunkSource,
    framing: Framing,
    progress: &mut WriteProgress,
) -> Result<(), AdapterError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(AdapterError::ChunkRead)?;
        if chunk.is_empty() {
            continue;
        }

        let produced = progress.body_bytes + chunk.len() as u64;
        match framing {
            Framing::Length(declared) if produced > declared => {
                return Err(AdapterError::LengthMismatch { declared, produced });
            }
            Framing::Chunked => {
                io.write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .map_err(AdapterError::Write)?;
                io.write_all(&chunk).await.map_err(AdapterError::Write)?;
                io.write_all(b"\r\n").await.map_err(AdapterError::Write)?;
            }
            _ => io.write_all(&chunk).await.map_err(AdapterError::Write)?,
        }
        io.flush().await.map_err(AdapterError::Write)?;
        progress.body_bytes = produced;
    }

    match framing {
        Framing::Chunked => io
            .write_all(b"0\r\n\r\n")
            .await
            .map_err(AdapterError::Write),
        Framing::Length(declared) if progress.body_bytes < declared => {
            Err(AdapterError::LengthMismatch {
                declared,
                produced: progress.body_bytes,
            })
        }
        _ => Ok(()),
    }
}

fn encode_head(status: u16, phrase: &str, headers: &Headers) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64 + headers.len() * 48);

    // Status line
    buf.put(format!("HTTP/1.1 {status} {phrase}\r\n").as_bytes());

    // Headers, every value of every name
    for (name, value) in headers.iter() {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }

    // Header/body separator
    buf.put(&b"\r\n"[..]);
    buf
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

fn valid_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}
