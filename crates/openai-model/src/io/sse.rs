use std::fmt::{self, Display};
use std::str::Utf8Error;

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => write!(f, "{err}"),
            Error::InvalidPayload => write!(f, "malformed event stream"),
        }
    }
}

/// Reads the `data` payloads of server-sent events from a chunk stream.
pub struct Sse {
    buf: String,
    // Trailing bytes of a UTF-8 sequence split across two chunks.
    incomplete: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            incomplete: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Events already buffered are drained before reading more.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.incomplete.extend_from_slice(&bytes);
            self.decode_incomplete()?;
        }
    }

    fn decode_incomplete(&mut self) -> Result<(), Error> {
        let valid_up_to = match str::from_utf8(&self.incomplete) {
            Ok(s) => {
                self.buf.push_str(s);
                self.incomplete.clear();
                return Ok(());
            }
            Err(err) => split_point(err)?,
        };
        let rest = self.incomplete.split_off(valid_up_to);
        if let Ok(s) = str::from_utf8(&self.incomplete) {
            self.buf.push_str(s);
        }
        self.incomplete = rest;
        Ok(())
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        // Only line feeds are recognized as line terminators.
        //
        // event   = *( comment / field ) end-of-line
        // comment = colon *any-char end-of-line
        // field   = 1*name-char [ colon [ space ] *any-char ] end-of-line
        while let Some(eol_idx) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(0..eol_idx + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines().filter(|line| !line.is_empty()) {
                if line.starts_with(':') {
                    continue;
                }
                let Some((name, value)) = line.split_once(':') else {
                    return Err(Error::InvalidPayload);
                };
                let value = value.strip_prefix(' ').unwrap_or(value);
                match name {
                    "data" => {
                        let data = data.get_or_insert_default();
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(value);
                    }
                    "event" | "id" | "retry" => {}
                    _ => return Err(Error::InvalidPayload),
                }
            }

            // Blocks made of comments only are keep-alives.
            if let Some(data) = data {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

/// Returns how many leading bytes decode, failing if the bytes are not a
/// truncated UTF-8 sequence.
#[inline]
fn split_point(err: Utf8Error) -> Result<usize, Error> {
    match err.error_len() {
        None => Ok(err.valid_up_to()),
        Some(_) => Err(Error::InvalidPayload),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_of(chunks: &[&'static [u8]]) -> Sse {
        Sse::new(Chunks::from_vec_deque(
            chunks.iter().copied().map(Bytes::from_static).collect(),
        ))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_of(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_several_events_in_one_chunk() {
        let mut sse = sse_of(&[b"data: a\n\ndata: b\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "a");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "b");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_of(&[b"data:", b" hello\n", b"\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keep_alive_comments() {
        let mut sse = sse_of(&[
            b": OPENROUTER PROCESSING\n\n",
            b"event: message\ndata: {}\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "{}");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_utf8_sequence() {
        // "é" is 0xC3 0xA9.
        let mut sse = sse_of(&[b"data: caf\xC3", b"\xA9\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "café");
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let mut sse = sse_of(&[b"xxxxxx\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let mut sse = sse_of(&[b"data: \xFF\xFE\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let mut sse = sse_of(&[b"xxxxxx\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_of(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
