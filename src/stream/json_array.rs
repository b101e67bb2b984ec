use std::fmt::Display;
use std::marker::PhantomData;

use bytes::Bytes;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::{ByteReader, ChunkDecoder, DecodeError, FailureLatch};
use crate::json_scan::{skip_ws, ScanError, ValueScanner, MAX_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayPosition {
    /// `[` not consumed yet.
    BeforeOpen,
    /// Right after `[`: an element or `]` follows.
    First,
    /// After an element: `,` or `]` follows.
    AfterElement,
    Finished,
}

/// Decodes a body holding one top-level JSON array, one element per call.
///
/// Only the bytes of the element being decoded (plus whatever arrived with
/// them) are buffered; consumed elements are released immediately.
pub struct JsonArrayDecoder<S, T> {
    reader: ByteReader<S>,
    position: ArrayPosition,
    latch: FailureLatch,
    _target: PhantomData<fn() -> T>,
}

impl<S, E, T> JsonArrayDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    T: DeserializeOwned,
{
    #[must_use]
    pub fn new(body: S) -> Self {
        Self {
            reader: ByteReader::new(body),
            position: ArrayPosition::BeforeOpen,
            latch: FailureLatch::default(),
            _target: PhantomData,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.reader = self.reader.with_cancellation(token);
        self
    }

    /// Decode the next array element.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] for bytes that are not a JSON
    /// array of `T`, or a transport/cancellation error from the body. All
    /// errors are terminal and repeated on later calls.
    pub async fn next_element(&mut self) -> Result<Option<T>, DecodeError> {
        self.latch.check()?;
        let result = self.read_element().await;
        self.latch.record(result)
    }

    async fn read_element(&mut self) -> Result<Option<T>, DecodeError> {
        loop {
            match self.position {
                ArrayPosition::Finished => return Ok(None),
                ArrayPosition::BeforeOpen => {
                    self.expect_token(&[b'[']).await?;
                    self.reader.consume(1);
                    self.position = ArrayPosition::First;
                }
                ArrayPosition::First => {
                    if self.peek_token().await? == b']' {
                        self.reader.consume(1);
                        self.position = ArrayPosition::Finished;
                        return Ok(None);
                    }
                    return self.decode_element().await.map(Some);
                }
                ArrayPosition::AfterElement => {
                    let token = self.expect_token(&[b',', b']']).await?;
                    self.reader.consume(1);
                    if token == b']' {
                        self.position = ArrayPosition::Finished;
                        return Ok(None);
                    }
                    return self.decode_element().await.map(Some);
                }
            }
        }
    }

    /// Skip whitespace and return the next significant byte without
    /// consuming it.
    async fn peek_token(&mut self) -> Result<u8, DecodeError> {
        loop {
            let buffered = self.reader.buffered();
            let start = skip_ws(buffered, 0);
            if let Some(&byte) = buffered.get(start) {
                self.reader.consume(start);
                return Ok(byte);
            }
            self.reader.consume(start);
            if !self.reader.fill().await? {
                return Err(DecodeError::Malformed(
                    "JSON array ended before its closing bracket".to_string(),
                ));
            }
        }
    }

    async fn expect_token(&mut self, allowed: &[u8]) -> Result<u8, DecodeError> {
        let byte = self.peek_token().await?;
        if allowed.contains(&byte) {
            Ok(byte)
        } else {
            Err(DecodeError::Malformed(format!(
                "unexpected byte '{}' in JSON array stream",
                char::from(byte)
            )))
        }
    }

    /// The element starts at offset zero once `peek_token` has dropped the
    /// leading whitespace, and nothing is consumed until it ends, so the
    /// scanner can pick up where it stopped after every `fill`.
    async fn decode_element(&mut self) -> Result<T, DecodeError> {
        self.peek_token().await?;
        let mut scanner = ValueScanner::new();
        loop {
            let at_eof = self.reader.is_eof();
            match scanner.scan(self.reader.buffered(), at_eof) {
                Ok(end) => {
                    let value = serde_json::from_slice(&self.reader.buffered()[..end])
                        .map_err(|err| {
                            DecodeError::Malformed(format!("array element does not match target: {err}"))
                        });
                    self.reader.consume(end);
                    self.position = ArrayPosition::AfterElement;
                    return value;
                }
                Err(ScanError::Invalid) => {
                    return Err(DecodeError::Malformed(
                        "invalid JSON inside array stream".to_string(),
                    ));
                }
                Err(ScanError::TooDeep) => {
                    return Err(DecodeError::Malformed(format!(
                        "array element nested deeper than {MAX_DEPTH} levels"
                    )));
                }
                Err(ScanError::Incomplete) => {
                    if !self.reader.fill().await? && at_eof {
                        return Err(DecodeError::Malformed(
                            "JSON array element truncated by end of stream".to_string(),
                        ));
                    }
                }
            }
        }
    }
}

impl<S, E, T> ChunkDecoder for JsonArrayDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    T: DeserializeOwned + Send,
{
    type Item = T;

    async fn next(&mut self) -> Result<Option<T>, DecodeError> {
        self.next_element().await
    }

    fn close(&mut self) {
        self.reader.close();
        self.position = ArrayPosition::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::convert::Infallible;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        v: i64,
    }

    fn body(chunks: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<Bytes, Infallible>(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_two_elements_then_end() {
        let mut decoder: JsonArrayDecoder<_, Item> =
            JsonArrayDecoder::new(body(vec![r#"[{"v":1},{"v":2}]"#]));
        assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 1 }));
        assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 2 }));
        assert_eq!(decoder.next_element().await.unwrap(), None);
        assert_eq!(decoder.next_element().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_array() {
        let mut decoder: JsonArrayDecoder<_, Item> = JsonArrayDecoder::new(body(vec![" [ ] "]));
        assert_eq!(decoder.next_element().await.unwrap(), None);
        assert_eq!(decoder.next_element().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_elements_split_at_every_boundary() {
        let src = "[\n{\"v\": 10}\r\n,\n{\"v\":-2, \"s\":\"a]b\"}\n]";
        for split in 1..src.len() {
            let (head, tail) = src.split_at(split);
            let chunks = vec![
                Ok::<Bytes, Infallible>(Bytes::copy_from_slice(head.as_bytes())),
                Ok(Bytes::copy_from_slice(tail.as_bytes())),
            ];
            let mut decoder: JsonArrayDecoder<_, Item> =
                JsonArrayDecoder::new(futures_util::stream::iter(chunks));
            assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 10 }), "{split}");
            assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: -2 }), "{split}");
            assert_eq!(decoder.next_element().await.unwrap(), None, "{split}");
        }
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let src: &'static str = r#"[{"v":1},{"v":2},{"v":3}]"#;
        let chunks: Vec<&'static str> = (0..src.len()).map(|i| &src[i..=i]).collect();
        let mut decoder: JsonArrayDecoder<_, Item> = JsonArrayDecoder::new(body(chunks));
        let mut seen = Vec::new();
        while let Some(item) = decoder.next_element().await.unwrap() {
            seen.push(item.v);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_not_an_array_is_malformed_and_sticky() {
        let mut decoder: JsonArrayDecoder<_, Item> = JsonArrayDecoder::new(body(vec![r#"{"v":1}"#]));
        let err = decoder.next_element().await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert_eq!(decoder.next_element().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_truncated_array_is_malformed() {
        let mut decoder: JsonArrayDecoder<_, Item> =
            JsonArrayDecoder::new(body(vec![r#"[{"v":1},{"v":"#]));
        assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 1 }));
        assert!(matches!(
            decoder.next_element().await,
            Err(DecodeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_separator_is_malformed() {
        let mut decoder: JsonArrayDecoder<_, Item> =
            JsonArrayDecoder::new(body(vec![r#"[{"v":1} {"v":2}]"#]));
        assert!(decoder.next_element().await.unwrap().is_some());
        assert!(matches!(
            decoder.next_element().await,
            Err(DecodeError::Malformed(_))
        ));
    }

    fn owned_chunks(src: &str, size: usize) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        let pieces: Vec<Result<Bytes, Infallible>> = src
            .as_bytes()
            .chunks(size)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        futures_util::stream::iter(pieces)
    }

    #[tokio::test]
    async fn test_large_element_across_many_reads() {
        let text = "x".repeat(200_000);
        let src = format!(r#"[{{"v":7,"s":"{text}"}},{{"v":8}}]"#);
        let mut decoder: JsonArrayDecoder<_, Item> = JsonArrayDecoder::new(owned_chunks(&src, 7));
        assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 7 }));
        assert_eq!(decoder.next_element().await.unwrap(), Some(Item { v: 8 }));
        assert_eq!(decoder.next_element().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deep_nesting_is_malformed_not_a_crash() {
        let depth = 200_000;
        let src = format!("[{}{}]", "[".repeat(depth), "]".repeat(depth));
        let mut decoder: JsonArrayDecoder<_, serde_json::Value> =
            JsonArrayDecoder::new(owned_chunks(&src, 4096));
        let err = decoder.next_element().await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(ref msg) if msg.contains("nested")), "{err:?}");
        assert_eq!(decoder.next_element().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_element_shape_mismatch_is_malformed() {
        let mut decoder: JsonArrayDecoder<_, Item> =
            JsonArrayDecoder::new(body(vec![r#"[{"v":"nope"}]"#]));
        assert!(matches!(
            decoder.next_element().await,
            Err(DecodeError::Malformed(_))
        ));
    }
}
