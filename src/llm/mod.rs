pub mod embedding;
pub mod openai;
pub mod provider;
pub mod types;

pub use embedding::{build_embedding_provider, EmbeddingProvider, HashingEmbedder, OpenAiCompatibleEmbedder};
pub use openai::{build_generator, OpenAiCompatibleGenerator};
pub use provider::Generator;
pub use types::{ChatMessage, ChatRequest};
