use bytes::BytesMut;

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// This is a single-pass reader: events can only be consumed once, in
/// arrival order.
pub struct Sse {
    buf: String,
    // Trailing bytes of a UTF-8 code point that was split across chunk
    // boundaries, kept until the rest of the code point arrives.
    pending: BytesMut,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            pending: BytesMut::new(),
            chunks,
        }
    }

    /// Reads the `data` payload of the next event.
    ///
    /// Returns `None` when the underlying transport has closed and the
    /// buffered data contains no more complete events.
    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Deliver a buffered event before touching the transport.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                // The transport has closed. Dangling bytes mean the stream
                // was cut in the middle of a code point.
                if !self.pending.is_empty() {
                    return Err(Error::InvalidPayload);
                }
                return Ok(None);
            };
            self.extend_decoded(&bytes)?;
        }
    }

    /// Appends a raw chunk, decoding as much of it as forms complete
    /// UTF-8. Chunk boundaries are arbitrary, so a code point may arrive
    /// in halves; its leading bytes stay in `pending` until then.
    fn extend_decoded(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.pending.extend_from_slice(bytes);
        match str::from_utf8(&self.pending) {
            Ok(s) => {
                self.buf.push_str(s);
                self.pending.clear();
            }
            Err(err) => {
                if err.error_len().is_some() {
                    // Malformed bytes, not a split code point.
                    return Err(Error::InvalidPayload);
                }
                let valid = self.pending.split_to(err.valid_up_to());
                if let Ok(s) = str::from_utf8(&valid) {
                    self.buf.push_str(s);
                }
            }
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        // For `end-of-line`, we only handle line feed.
        //
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        // end-of-line   = ( cr lf / cr / lf )
        while let Some(eol_idx) = self.buf.find("\n\n") {
            let record = &self.buf[0..eol_idx];

            let mut data: Option<String> = None;
            let mut has_fields = false;
            for line in record.lines() {
                if line.starts_with(':') {
                    // A comment, skip it.
                    continue;
                }
                has_fields = true;

                let (name, value) = match line.split_once(':') {
                    Some((name, value)) => {
                        // A single leading space is part of the syntax,
                        // not the value.
                        (name, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if name != "data" {
                    // Other fields are not supported, ignore them.
                    continue;
                }

                // Multiple `data` lines concatenate with a line feed.
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Consume the bytes from the buffer.
            self.buf.drain(0..eol_idx + 2);

            match data {
                Some(data) => return Ok(Some(data)),
                None if has_fields => {
                    // A record that carries fields but no data payload
                    // is not something this protocol produces.
                    return Err(Error::InvalidPayload);
                }
                // Comment-only or empty record, keep scanning.
                None => continue,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn test_normal_events() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data: hello\n\n"),
                Bytes::from_static(b"data: bye\n\n"),
            ]
            .into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data:"),
                Bytes::from_static(b" hello\n"),
                Bytes::from_static(b"\n"),
            ]
            .into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_utf8_split_across_chunks() {
        // The transport may cut a multi-byte code point in half.
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data: caf\xc3"),
                Bytes::from_static(b"\xa9\n\n"),
            ]
            .into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "café");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_utf8_cut_at_close() {
        // A code point left unfinished when the transport closes is an
        // error, unlike one that completes in a later chunk.
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"data: caf\xc3")].into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"data: \xff\n\n")].into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }

    #[tokio::test]
    async fn test_multi_event_chunk() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"data: hello\n\ndata: bye\n\n")].into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multi_line_data() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"data: hello\ndata: bye\n\n")].into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello\nbye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ignored_fields() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b": welcome\n\n"),
                Bytes::from_static(b"event: message\ndata: hello\n\n"),
            ]
            .into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"xxxxxx\n\n")].into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        // An incomplete record never becomes an event.
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data: hello\n"),
                Bytes::from_static(b"data: bye\n"),
            ]
            .into(),
        );
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
