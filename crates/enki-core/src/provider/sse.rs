//! Server-sent event decoding for streamed completions.

use futures::{Stream, StreamExt};

use super::ChunkStream;
use crate::error::ProviderError;

/// What one `data:` payload means to a provider.
#[derive(Debug, PartialEq, Eq)]
pub enum Delta {
    Text(String),
    Skip,
    Done,
}

/// Splits a byte stream into `data:` payloads. Lines may arrive split across
/// chunks, including in the middle of a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, returning every complete payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Payload of a trailing line with no newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Turn a response body into text chunks, using `extract` to interpret each
/// payload. Ends at [`Delta::Done`], at the end of the body, or after the
/// first error.
pub fn delta_stream<S, B, E, F>(body: S, mut extract: F) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
    F: FnMut(&str) -> Result<Delta, ProviderError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        loop {
            let (payloads, last) = match body.next().await {
                Some(Ok(bytes)) => (decoder.push(bytes.as_ref()), false),
                Some(Err(e)) => {
                    yield Err(e.into());
                    return;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };
            for data in payloads {
                match extract(&data) {
                    Ok(Delta::Text(text)) if !text.is_empty() => {
                        yield Ok(text);
                    }
                    Ok(Delta::Text(_)) | Ok(Delta::Skip) => {}
                    Ok(Delta::Done) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if last {
                break;
            }
        }
    })
}

/// Parse a payload as JSON.
pub fn parse_json(data: &str) -> Result<serde_json::Value, ProviderError> {
    serde_json::from_str(data).map_err(|e| ProviderError::Parse(format!("{e}: {data}")))
}
