//! Server-sent events plumbing for HTTP generator adapters.
//!
//! [`drain_events`] pulls complete events out of a byte buffer;
//! [`sse_event_stream`] turns a `reqwest::Response` into a stream of
//! parsed [`SseEvent`]s. Bytes are buffered undecoded so a multi-byte
//! character split across two network chunks survives intact.

use crate::util::from_reqwest;
use tl_domain::error::Result;
use tl_domain::stream::BoxStream;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// The `event:` field, if the block had one.
    pub event: Option<String>,
    /// All `data:` lines of the block joined with `\n`.
    pub data: String,
}

/// Extract complete events from an SSE buffer.
///
/// Events are delimited by a blank line. Comment lines (`:`) and `id:` /
/// `retry:` fields are ignored, as are blocks with no `data:`. Consumed
/// bytes are removed; a trailing partial event stays for the next call.
pub(crate) fn drain_events(buffer: &mut Vec<u8>) -> Vec<SseEvent> {
    let mut events = Vec::new();

    while let Some((pos, delim_len)) = find_delimiter(buffer) {
        let block: Vec<u8> = buffer.drain(..pos).collect();
        buffer.drain(..delim_len);

        let block = String::from_utf8_lossy(&block);
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(v) = line.strip_prefix("event:") {
                event = Some(v.trim().to_owned());
            } else if let Some(v) = line.strip_prefix("data:") {
                data.push(v.strip_prefix(' ').unwrap_or(v));
            }
        }

        if !data.is_empty() {
            events.push(SseEvent {
                event,
                data: data.join("\n"),
            });
        }
    }

    events
}

fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Stream the SSE events of `response` until the body closes.
///
/// A trailing event without its final blank line is still dispatched.
/// Transport errors end the stream after yielding one `Err`.
pub(crate) fn sse_event_stream(response: reqwest::Response) -> BoxStream<'static, Result<SseEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    for event in drain_events(&mut buffer) {
                        yield Ok(event);
                    }
                }
                Ok(None) => {
                    if !buffer.iter().all(u8::is_ascii_whitespace) {
                        buffer.extend_from_slice(b"\n\n");
                        for event in drain_events(&mut buffer) {
                            yield Ok(event);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn drain_named_event() {
        let mut b = buf("event: thread.message.delta\ndata: {\"a\":1}\n\n");
        let events = drain_events(&mut b);
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("thread.message.delta".into()),
                data: "{\"a\":1}".into()
            }]
        );
        assert!(b.is_empty());
    }

    #[test]
    fn drain_multiple_and_keep_partial() {
        let mut b = buf("data: first\n\ndata: second\n\nevent: done\ndata: [DO");
        let events = drain_events(&mut b);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, None);
        assert_eq!(events[1].data, "second");
        assert_eq!(b, buf("event: done\ndata: [DO"));
    }

    #[test]
    fn drain_handles_crlf() {
        let mut b = buf("event: done\r\ndata: [DONE]\r\n\r\n");
        let events = drain_events(&mut b);
        assert_eq!(events[0].event.as_deref(), Some("done"));
        assert_eq!(events[0].data, "[DONE]");
    }

    #[test]
    fn drain_joins_multiline_data_and_skips_comments() {
        let mut b = buf(": keepalive\n\ndata: a\ndata: b\n\n");
        let events = drain_events(&mut b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn split_multibyte_char_survives() {
        let full = "data: héllo\n\n".as_bytes();
        let split_at = full.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut b = full[..split_at].to_vec();
        assert!(drain_events(&mut b).is_empty());
        b.extend_from_slice(&full[split_at..]);
        assert_eq!(drain_events(&mut b)[0].data, "héllo");
    }
}
