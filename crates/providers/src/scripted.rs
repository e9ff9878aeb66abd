use crate::traits::*;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Script {
    /// Streams the tokens, then ends.
    Tokens(Vec<String>),
    /// Streams the tokens, then never finishes.
    Hang(Vec<String>),
    /// Fails the request before any token is produced.
    Fail(String),
}

impl Script {
    /// Splits `text` into whitespace-preserving word tokens.
    pub fn text(text: &str) -> Self {
        Script::Tokens(split_tokens(text))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Deterministic provider that replays queued replies and records every request.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RecordedRequest>>,
    token_delay: Duration,
}

impl ScriptedProvider {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            token_delay: Duration::ZERO,
        }
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn models_requested(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.model.clone())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, ProviderError> {
        self.requests.lock().push(RecordedRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
        });

        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("script exhausted".to_string()))?;

        let delay = self.token_delay;
        let delayed = move |tokens: Vec<String>| {
            stream::iter(tokens).then(move |token| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, ProviderError>(token)
            })
        };

        let tokens: TokenStream = match script {
            Script::Tokens(tokens) => Box::pin(delayed(tokens)),
            Script::Hang(tokens) => Box::pin(delayed(tokens).chain(stream::pending())),
            Script::Fail(reason) => return Err(ProviderError::Api(reason)),
        };
        Ok(tokens)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_and_records_models() {
        let provider = ScriptedProvider::new([
            Script::text("Final Answer: hi"),
            Script::Fail("down".into()),
        ]);

        let tokens: Vec<String> = provider
            .stream("a", &[ChatMessage::new("user", "q")])
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(tokens.concat(), "Final Answer: hi");

        assert!(provider.stream("b", &[]).await.is_err());
        assert!(provider.stream("c", &[]).await.is_err());
        assert_eq!(provider.models_requested(), vec!["a", "b", "c"]);
    }
}
