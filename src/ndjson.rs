//! Newline-delimited JSON framing.
//!
//! The relay forwards upstream text fragments without regard to line
//! boundaries, so a single JSON line may arrive split across many chunks and
//! a multi-byte character may straddle two chunks. [`NdjsonDecoder`] keeps
//! the partial state between chunks; [`decode_stream`] wraps it around a
//! byte stream.

use std::char::REPLACEMENT_CHARACTER;
use std::marker::PhantomData;

use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;

/// Longest slice of a malformed line echoed into diagnostics.
const DIAGNOSTIC_PREVIEW_CHARS: usize = 200;

/// Incremental NDJSON decoder.
///
/// Values are produced in line order. Blank lines are skipped and lines that
/// fail to deserialize are dropped with a warning; neither aborts decoding.
#[derive(Debug)]
pub struct NdjsonDecoder<T> {
    /// Decoded text not yet terminated by `\n`.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    pending: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Default for NdjsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> NdjsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            pending: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Feed one chunk and return every value completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<T> {
        self.decode_utf8(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split('\n')
            .filter_map(parse_line::<T>)
            .collect()
    }

    /// Signal end of stream and parse whatever remains in the buffer.
    pub fn finish(mut self) -> Option<T> {
        if !self.pending.is_empty() {
            // A sequence cut off by the end of the stream decodes to U+FFFD,
            // matching a non-streaming UTF-8 decode of the same bytes.
            self.buffer.push(REPLACEMENT_CHARACTER);
            self.pending.clear();
        }
        parse_line(&self.buffer)
    }

    /// Bytes received but not yet emitted as values.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.pending.len()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let joined;
        let mut input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            joined = [std::mem::take(&mut self.pending).as_slice(), chunk].concat();
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = input.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            self.buffer.push(REPLACEMENT_CHARACTER);
                            input = &after[invalid..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn parse_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            let preview: String = line.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
            tracing::warn!(error = %e, line = %preview, "Dropping malformed stream line");
            None
        }
    }
}

/// Decode a byte stream into a lazy stream of values.
///
/// Transport errors from the source are passed through once and end the
/// output; everything after them is discarded.
pub fn decode_stream<T, S, B, E>(source: S) -> impl Stream<Item = Result<T, E>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = NdjsonDecoder::<T>::new();
        let mut failed = false;
        futures::pin_mut!(source);

        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(bytes) => {
                    for value in decoder.push(bytes.as_ref()) {
                        yield Ok(value);
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed {
            if let Some(value) = decoder.finish() {
                yield Ok(value);
            }
        }
    }
}
