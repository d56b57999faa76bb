use std::pin::Pin;

use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    docs: &'a [String],
    query: &'a str,
    message_history: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    docs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ListDocsResponse {
    docs: Vec<String>,
}

/// Client for the document Q&A backend. Three plain requests (list, upload,
/// delete) plus the streaming `/query` endpoint.
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: String) -> Self {
        GatewayClient {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn list_docs(&self) -> Result<Vec<String>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/list_docs", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }

        let body: ListDocsResponse = response.json().await?;
        Ok(body.docs)
    }

    /// Upload one document as a multipart form. The backend keys the document
    /// by its filename; the response body is ignored beyond the status.
    pub async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload_file", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }
        Ok(())
    }

    pub async fn delete_docs(&self, docs: &[String]) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(format!("{}/delete_docs", self.base_url))
            .json(&DeleteRequest { docs })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }
        Ok(())
    }

    /// Ask a question scoped to `docs`. The backend answers with a chunked
    /// plain-text stream; the returned [`AnswerStream`] yields it fragment by
    /// fragment as bytes arrive.
    pub async fn query(
        &self,
        docs: &[String],
        query: &str,
        message_history: &str,
    ) -> Result<AnswerStream, GatewayError> {
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&QueryRequest {
                docs,
                query,
                message_history,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }

        Ok(AnswerStream {
            chunks: Box::pin(response.bytes_stream().map_ok(|chunk| chunk.to_vec())),
            decoder: StreamDecoder::new(),
        })
    }
}

/// The in-flight answer to one query. Fragments come out in arrival order;
/// a chunk that ends mid-character is held back until the bytes that
/// complete it arrive.
pub struct AnswerStream {
    chunks: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    decoder: StreamDecoder,
}

impl AnswerStream {
    /// The next decoded fragment, or `None` once the stream is exhausted.
    pub async fn next_fragment(&mut self) -> Result<Option<String>, GatewayError> {
        loop {
            match self.chunks.next().await {
                Some(chunk) => {
                    let text = self.decoder.push(&chunk?);
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
                None => {
                    let tail = self.decoder.finish();
                    return Ok(if tail.is_empty() { None } else { Some(tail) });
                }
            }
        }
    }
}

/// Incremental UTF-8 decoder. A multi-byte character split across chunk
/// boundaries is carried over and emitted with the chunk that completes it;
/// genuinely invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    out.push_str(text);
                    self.carry.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing character; wait for more bytes.
                            self.carry.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still carried once the stream ends. A dangling
    /// partial character decodes lossily at this point.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"Hel"), "Hel");
        assert_eq!(decoder.push(b"lo, "), "lo, ");
        assert_eq!(decoder.push(b"world"), "world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_carries_split_two_byte_char() {
        // "é" is 0xC3 0xA9
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&[0x63, 0x61, 0x66, 0xC3]), "caf");
        assert_eq!(decoder.push(&[0xA9]), "é");
    }

    #[test]
    fn test_decoder_carries_split_four_byte_char() {
        let crab = "🦀".as_bytes();
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&crab[..2]), "");
        assert_eq!(decoder.push(&crab[2..3]), "");
        assert_eq!(decoder.push(&crab[3..]), "🦀");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&[0x61, 0xFF, 0x62]), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_flushes_dangling_tail_lossily() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&[0x61, 0xC3]), "a");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_query_request_wire_shape() {
        let docs = vec!["a.pdf".to_string(), "b.pdf".to_string()];
        let request = QueryRequest {
            docs: &docs,
            query: "What is X?",
            message_history: "Assistant: hi",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "docs": ["a.pdf", "b.pdf"],
                "query": "What is X?",
                "message_history": "Assistant: hi",
            })
        );
    }

    #[test]
    fn test_delete_request_wire_shape() {
        let docs = vec!["a.pdf".to_string()];
        let value = serde_json::to_value(&DeleteRequest { docs: &docs }).unwrap();
        assert_eq!(value, serde_json::json!({ "docs": ["a.pdf"] }));
    }

    #[test]
    fn test_list_docs_response_shape() {
        let body: ListDocsResponse =
            serde_json::from_str(r#"{ "docs": ["a.pdf", "b.pdf"] }"#).unwrap();
        assert_eq!(body.docs, vec!["a.pdf", "b.pdf"]);
    }
}
