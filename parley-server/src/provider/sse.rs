//! Server-sent events framing for upstream response bodies.
//!
//! Bytes are buffered until a blank line closes an event, so a network chunk
//! may end anywhere, including inside a multi-byte UTF-8 sequence or between
//! the `\r` and `\n` of a line ending.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use super::ProviderError;

/// One dispatched event. Multiple `data:` lines are joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Turn a byte stream into a stream of events.
///
/// The stream ends after the first error. A trailing event that is not
/// followed by a blank line is still dispatched when the body ends.
pub fn decode_events<S, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut finished)| async move {
            loop {
                if let Some(block) = take_block(&mut buffer) {
                    match parse_block(&block) {
                        Ok(Some(event)) => return Some((Ok(event), (bytes, buffer, finished))),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (bytes, Vec::new(), true))),
                    }
                }
                if finished {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e.into()), (bytes, Vec::new(), true))),
                    None => {
                        finished = true;
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            buffer.clear();
                        } else {
                            buffer.extend_from_slice(b"\n\n");
                        }
                    }
                }
            }
        },
    )
}

/// Remove and return everything before the first blank line, consuming the
/// blank line itself. Returns `None` until a complete block is buffered.
fn take_block(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut line_start = 0;
    let mut i = 0;
    while i < buffer.len() {
        let b = buffer[i];
        if b != b'\n' && b != b'\r' {
            i += 1;
            continue;
        }
        let mut end = i + 1;
        if b == b'\r' {
            // Could be the first half of a CRLF split across chunks.
            if end == buffer.len() {
                return None;
            }
            if buffer[end] == b'\n' {
                end += 1;
            }
        }
        if i == line_start {
            let block = buffer[..line_start].to_vec();
            buffer.drain(..end);
            return Some(block);
        }
        line_start = end;
        i = end;
    }
    None
}

fn parse_block(block: &[u8]) -> Result<Option<SseEvent>, ProviderError> {
    let text = std::str::from_utf8(block)
        .map_err(|e| ProviderError::MalformedStream(format!("invalid UTF-8 in event: {e}")))?;

    let mut event = None;
    let mut data: Option<String> = None;
    for line in text.split(['\n', '\r']).filter(|l| !l.is_empty()) {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_owned()),
            },
            "event" => event = Some(value.to_owned()),
            // id / retry carry nothing we act on.
            _ => {}
        }
    }

    Ok(data.map(|data| SseEvent { event, data }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
