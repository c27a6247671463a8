//! Normalizes provider streaming bodies into a single sequence of text deltas.
//!
//! Groq and Hugging Face send OpenAI-style `data: {"choices":[{"delta":{"content":..}}]}`
//! lines ending with `data: [DONE]`. Gemini sends `data: {"candidates":[..]}` lines and
//! simply closes the connection.

use futures_util::{stream::BoxStream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::{credentials::Provider, models::StreamDelta, transport::TransportError};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, TransportError>>;

/// What a single complete line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineParse {
    Delta(String),
    Skip,
    Done,
    Malformed(String),
}

/// Accumulates raw chunks and hands back only complete lines. The trailing
/// fragment stays buffered until its newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        for (offset, byte) in self.pending[scan_from..].iter().enumerate() {
            if *byte == b'\n' {
                let end = scan_from + offset;
                lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
                start = end + 1;
            }
        }
        if start > 0 {
            self.pending.drain(..start);
        }
        lines
    }

    /// Returns whatever is left once the transport has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

pub fn parse_line(provider: Provider, line: &str) -> LineParse {
    let line = line.trim();
    if line.is_empty() {
        return LineParse::Skip;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineParse::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return LineParse::Done;
    }

    let text = match provider {
        Provider::Groq | Provider::HuggingFace => {
            serde_json::from_str::<ChatCompletionChunk>(payload).map(ChatCompletionChunk::text)
        }
        Provider::Gemini => {
            serde_json::from_str::<GeminiChunk>(payload).map(GeminiChunk::text)
        }
    };

    match text {
        Ok(Some(text)) if !text.is_empty() => LineParse::Delta(text),
        Ok(_) => LineParse::Skip,
        Err(error) => LineParse::Malformed(error.to_string()),
    }
}

/// Turns a raw body stream into deltas. Ends on transport close or the `[DONE]` sentinel.
pub fn normalize<S>(provider: Provider, mut upstream: S) -> DeltaStream
where
    S: futures_util::Stream<Item = Result<Vec<u8>, TransportError>> + Send + Unpin + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer = LineBuffer::default();
        let mut done = false;

        while let Some(next) = upstream.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            for line in buffer.push(&chunk) {
                match parse_line(provider, &line) {
                    LineParse::Delta(text) => yield Ok(StreamDelta { text }),
                    LineParse::Skip => {}
                    LineParse::Done => {
                        done = true;
                        break;
                    }
                    LineParse::Malformed(error) => {
                        debug!(provider = %provider, error = %error, "skipping malformed stream line");
                    }
                }
            }

            if done {
                return;
            }
        }

        if let Some(rest) = buffer.finish() {
            match parse_line(provider, &rest) {
                LineParse::Delta(text) => yield Ok(StreamDelta { text }),
                LineParse::Malformed(error) => {
                    debug!(provider = %provider, error = %error, "dropping partial trailing line");
                }
                LineParse::Skip | LineParse::Done => {}
            }
        }
    };

    stream.boxed()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    #[serde(default)]
    delta: ChatCompletionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionChunk {
    fn text(self) -> Option<String> {
        self.choices.into_iter().next()?.delta.content
    }
}

#[derive(Debug, Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiChunk {
    fn text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn chunks(parts: &[&str]) -> impl futures_util::Stream<Item = Result<Vec<u8>, TransportError>> {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(part.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(provider: Provider, parts: &[&str]) -> Vec<String> {
        normalize(provider, chunks(parts))
            .map(|delta| delta.expect("no transport errors").text)
            .collect::<Vec<_>>()
            .await
    }

    #[test]
    fn parses_chat_completion_and_gemini_lines() {
        assert_eq!(
            parse_line(
                Provider::Groq,
                r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#
            ),
            LineParse::Delta("Hi".to_owned())
        );
        assert_eq!(
            parse_line(
                Provider::Gemini,
                r#"data: {"candidates":[{"content":{"parts":[{"text":"Bon"}]}}]}"#
            ),
            LineParse::Delta("Bon".to_owned())
        );
        assert_eq!(parse_line(Provider::Groq, "data: [DONE]"), LineParse::Done);
        assert_eq!(parse_line(Provider::Groq, "   "), LineParse::Skip);
        assert_eq!(parse_line(Provider::Groq, ": keep-alive"), LineParse::Skip);
        assert_eq!(
            parse_line(Provider::Groq, r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            LineParse::Skip
        );
        assert_eq!(
            parse_line(Provider::Gemini, r#"data: {"candidates":[]}"#),
            LineParse::Skip
        );
        assert!(matches!(
            parse_line(Provider::Groq, r#"data: {"choices":[{"del"#),
            LineParse::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn json_split_across_chunks_yields_one_delta() {
        let deltas = collect(
            Provider::Groq,
            &[
                r#"data: {"choices":[{"delta":{"con"#,
                "tent\":\"Hello\"}}]}\n",
                "data: [DONE]\n",
            ],
        )
        .await;
        assert_eq!(deltas, vec!["Hello"]);
    }

    #[tokio::test]
    async fn malformed_line_does_not_abort_stream() {
        let deltas = collect(
            Provider::Groq,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: not-json\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            ],
        )
        .await;
        assert_eq!(deltas, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn sentinel_stops_reading() {
        let deltas = collect(
            Provider::HuggingFace,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\ndata: [DONE]\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            ],
        )
        .await;
        assert_eq!(deltas, vec!["x"]);
    }

    #[tokio::test]
    async fn gemini_stream_ends_on_close_and_flushes_tail() {
        let deltas = collect(
            Provider::Gemini,
            &[
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Bon\"}]}}]}\r\n\r\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"jour\"}]}}]}",
            ],
        )
        .await;
        assert_eq!(deltas, vec!["Bon", "jour"]);
    }

    #[tokio::test]
    async fn partial_fragment_alone_yields_nothing() {
        let deltas = collect(Provider::Groq, &[r#"data: {"choices":[{"delta":{"con"#]).await;
        assert!(deltas.is_empty());
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"né\"}}]}\n".as_bytes();
        let split = line.iter().position(|byte| *byte == 0xc3).expect("é start byte") + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        let lines = buffer.push(&line[split..]);

        assert_eq!(
            parse_line(Provider::Groq, &lines[0]),
            LineParse::Delta("né".to_owned())
        );
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn many_lines_in_one_chunk_keep_order_and_tail() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"first ha").is_empty());

        let mut chunk = b"lf\n".to_vec();
        for index in 0..2_000 {
            chunk.extend_from_slice(format!("line {index}\n").as_bytes());
        }
        chunk.extend_from_slice(b"\npartial");
        let lines = buffer.push(&chunk);

        assert_eq!(lines.len(), 2_002);
        assert_eq!(lines[0], "first half");
        assert_eq!(lines[1], "line 0");
        assert_eq!(lines[2_000], "line 1999");
        assert_eq!(lines[2_001], "");
        assert_eq!(buffer.finish().as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let upstream = stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err(TransportError::Network("reset".to_owned())),
        ]);
        let items = normalize(Provider::Groq, upstream).collect::<Vec<_>>().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
