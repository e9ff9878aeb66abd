use crate::traits::*;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Display;
use std::time::Duration;
use tracing::debug;

/// Streaming chat against an Ollama server (`/api/chat`, NDJSON responses).
pub struct OllamaProvider {
    client: Client,
    host: String,
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(host: &str, connect_timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            stop: vec!["Observation:".to_string()],
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, ProviderError> {
        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "options": { "stop": self.stop },
        });

        debug!(%model, messages = messages.len(), "Requesting completion");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("{}: {}", status, text)));
        }

        Ok(Box::pin(parse_ndjson_stream(response.bytes_stream())))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Splits a byte stream on newlines and yields the `message.content` of each chunk.
pub fn parse_ndjson_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let bytes = Box::pin(bytes);

    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    match parse_line(&line) {
                        Ok(LineOutcome::Token(token)) => {
                            return Some((Ok(token), (bytes, buffer, false)));
                        }
                        Ok(LineOutcome::Skip) => continue,
                        Ok(LineOutcome::Done) => return None,
                        Err(e) => return Some((Err(e), (bytes, buffer, true))),
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        return Some((
                            Err(ProviderError::Stream(format!("stream read error: {e}"))),
                            (bytes, buffer, true),
                        ));
                    }
                    None => {
                        let rest = std::mem::take(&mut buffer);
                        return match parse_line(&rest) {
                            Ok(LineOutcome::Token(token)) => {
                                Some((Ok(token), (bytes, buffer, true)))
                            }
                            Ok(_) => None,
                            Err(e) => Some((Err(e), (bytes, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

enum LineOutcome {
    Token(String),
    Skip,
    Done,
}

fn parse_line(raw: &[u8]) -> Result<LineOutcome, ProviderError> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineOutcome::Skip);
    }

    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::Parse(format!("failed to parse chunk: {e} (data: {line})")))?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::Api(error));
    }

    let token = chunk.message.map(|m| m.content).unwrap_or_default();
    match (token.is_empty(), chunk.done) {
        (false, _) => Ok(LineOutcome::Token(token)),
        (true, true) => Ok(LineOutcome::Done),
        (true, false) => Ok(LineOutcome::Skip),
    }
}
