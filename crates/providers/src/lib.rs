pub mod ollama;
pub mod scripted;
pub mod traits;

pub use ollama::OllamaProvider;
pub use scripted::{RecordedRequest, Script, ScriptedProvider};
pub use traits::{ChatMessage, ModelProvider, ProviderError, TokenStream};
