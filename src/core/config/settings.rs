//! Typed view over the merged YAML configuration.
//!
//! Every field has a default so an empty `config.yml` yields a working
//! offline setup (hashing embeddings, local OpenAI-compatible LLM server).

use std::fmt;

use serde::{Deserialize, Serialize};

pub const MAX_RETRIEVAL_K: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub server: ServerSettings,
    pub paths: PathSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub max_question_length: usize,
    pub max_history_turns: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_question_length: 2000,
            max_history_turns: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub documents_dir: String,
    pub vector_store_dir: String,
    pub history_file: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            documents_dir: "documents".to_string(),
            vector_store_dir: "vector_store".to_string(),
            history_file: "history.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Neighbors requested per query (1..=20).
    pub k: usize,
    /// Minimum similarity a chunk needs to be kept, in [0, 1].
    pub score_threshold: f64,
    pub snippet_max_length: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 5,
            score_threshold: 0.0,
            snippet_max_length: 350,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    OpenaiCompatible,
    Hashing,
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingBackend::OpenaiCompatible => write!(f, "openai_compatible"),
            EmbeddingBackend::Hashing => write!(f, "hashing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hashing,
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
            dimension: 384,
            batch_size: 32,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    Openai,
    Groq,
    Lmstudio,
    OpenaiCompatible,
}

impl LlmBackend {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmBackend::Openai => "https://api.openai.com",
            LlmBackend::Groq => "https://api.groq.com/openai",
            LlmBackend::Lmstudio => "http://localhost:1234",
            LlmBackend::OpenaiCompatible => "http://localhost:8080",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmBackend::Openai | LlmBackend::Groq)
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmBackend::Openai => "openai",
            LlmBackend::Groq => "groq",
            LlmBackend::Lmstudio => "lmstudio",
            LlmBackend::OpenaiCompatible => "openai_compatible",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Lmstudio,
            model: "llama-3.3-70b-versatile".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.2,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let settings: Settings = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(settings.retrieval.k, 5);
        assert_eq!(settings.retrieval.score_threshold, 0.0);
        assert_eq!(settings.retrieval.snippet_max_length, 350);
        assert_eq!(settings.chunking.chunk_size, 800);
        assert_eq!(settings.embedding.backend, EmbeddingBackend::Hashing);
    }

    #[test]
    fn backends_parse_from_snake_case() {
        let yaml = "llm:\n  backend: groq\nembedding:\n  backend: openai_compatible\n";
        let settings: Settings = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(settings.llm.backend, LlmBackend::Groq);
        assert!(settings.llm.backend.requires_api_key());
        assert_eq!(settings.embedding.backend, EmbeddingBackend::OpenaiCompatible);
    }
}
