//! Server-sent-event decoding for streamed chat completions.
//!
//! Turns the raw response byte stream into content deltas, buffering partial
//! lines and stopping at `data: [DONE]`.

use super::LlmError;
use bytes::Bytes;
use futures::stream::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Debug, Deserialize)]
struct ChunkRaw {
    #[serde(default)]
    choices: Vec<ChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct ChoiceRaw {
    #[serde(default)]
    delta: DeltaRaw,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaRaw {
    #[serde(default)]
    content: Option<String>,
}

enum Line {
    Delta(String),
    Done,
}

pub struct DeltaStream<S> {
    inner: Pin<Box<S>>,
    buffer: String,
    pending: Vec<u8>,
    finished: bool,
}

impl<S> DeltaStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    pub fn new(bytes: S) -> Self {
        Self {
            inner: Box::pin(bytes),
            buffer: String::new(),
            pending: Vec::new(),
            finished: false,
        }
    }
}

impl<S> Stream for DeltaStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<String, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match next_line(&mut this.buffer) {
                Some(Ok(Line::Delta(text))) => return Poll::Ready(Some(Ok(text))),
                Some(Ok(Line::Done)) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Some(Err(err)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {}
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend_from_slice(&bytes);
                    if let Err(err) = drain_utf8(&mut this.pending, &mut this.buffer) {
                        this.finished = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(LlmError::Http(err.to_string()))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if !this.buffer.trim().is_empty() {
                        this.buffer.push('\n');
                        if let Some(Ok(Line::Delta(text))) = next_line(&mut this.buffer) {
                            return Poll::Ready(Some(Ok(text)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Moves the decodable prefix of `pending` into `buffer`, keeping a trailing
/// multi-byte sequence that was cut at a chunk boundary.
fn drain_utf8(pending: &mut Vec<u8>, buffer: &mut String) -> Result<(), LlmError> {
    let valid = match std::str::from_utf8(pending) {
        Ok(text) => text.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(err) => {
            return Err(LlmError::InvalidResponse(format!(
                "invalid utf-8 in stream: {err}"
            )));
        }
    };
    let rest = pending.split_off(valid);
    if let Ok(text) = std::str::from_utf8(pending) {
        buffer.push_str(text);
    }
    *pending = rest;
    Ok(())
}

/// Pops the next meaningful `data:` line. Empty deltas and non-data lines are skipped.
fn next_line(buffer: &mut String) -> Option<Result<Line, LlmError>> {
    loop {
        let newline = buffer.find('\n')?;
        let line = buffer[..newline].trim().to_string();
        buffer.drain(..=newline);

        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Some(Ok(Line::Done));
        }

        match serde_json::from_str::<ChunkRaw>(data) {
            Ok(raw) => {
                let delta = raw
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if delta.is_empty() {
                    continue;
                }
                return Some(Ok(Line::Delta(delta)));
            }
            Err(err) => {
                return Some(Err(LlmError::InvalidResponse(format!(
                    "bad stream chunk: {err} (data: {})",
                    super::excerpt(data, 200)
                ))));
            }
        }
    }
}
