//! Question answering: retrieve → assemble context → generate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context_builder::{build_context, deduplicate_sources, Citation};
use super::error::{RagError, Result};
use super::retriever::{preview, Retriever};
use crate::core::config::settings::MAX_RETRIEVAL_K;
use crate::core::config::Settings;
use crate::llm::{ChatMessage, ChatRequest, Generator};

pub const NO_ANSWER_FALLBACK: &str =
    "I couldn't find any relevant information in the knowledge base to answer this question.";

const SYSTEM_PROMPT: &str = "You are a helpful and knowledgeable AI assistant.
Use ONLY the context below to answer the user's question.
If the context does not contain enough information to fully answer the question,
say so clearly and do not make up information.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            conversation_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Citation>,
    pub chunks_retrieved: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub default_k: usize,
    pub score_threshold: f64,
    pub snippet_max_length: usize,
    pub max_question_length: usize,
    pub max_history_turns: usize,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_k: settings.retrieval.k,
            score_threshold: settings.retrieval.score_threshold,
            snippet_max_length: settings.retrieval.snippet_max_length,
            max_question_length: settings.app.max_question_length,
            max_history_turns: settings.app.max_history_turns,
            temperature: settings.llm.temperature,
            max_tokens: settings.llm.max_tokens,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub struct QaPipeline {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    options: PipelineOptions,
}

impl QaPipeline {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            retriever,
            generator,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskOutcome> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput(
                "Question must not be empty.".to_string(),
            ));
        }
        let length = question.chars().count();
        if length > self.options.max_question_length {
            return Err(RagError::InvalidInput(format!(
                "Question is too long ({} characters, max {}).",
                length, self.options.max_question_length
            )));
        }
        let k = request.top_k.unwrap_or(self.options.default_k);
        if !(1..=MAX_RETRIEVAL_K).contains(&k) {
            return Err(RagError::InvalidInput(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_RETRIEVAL_K, k
            )));
        }

        tracing::info!("Processing question: {:?}", preview(question, 120));
        let chunks = self
            .retriever
            .retrieve(question, k, self.options.score_threshold)
            .await?;

        if chunks.is_empty() {
            tracing::info!("No chunks above threshold; returning fallback answer");
            return Ok(AskOutcome {
                question: question.to_string(),
                answer: NO_ANSWER_FALLBACK.to_string(),
                sources: Vec::new(),
                chunks_retrieved: 0,
            });
        }

        let context = build_context(&chunks);
        let messages = self.render_prompt(&context, question, &request.conversation_history);
        let chat = ChatRequest::new(messages)
            .with_temperature(self.options.temperature)
            .with_max_tokens(self.options.max_tokens);

        let answer = self
            .generator
            .generate(chat)
            .await
            .map_err(|e| match e {
                e @ RagError::Generation(_) => e,
                other => RagError::Generation(other.to_string()),
            })?
            .trim()
            .to_string();

        let sources = deduplicate_sources(&chunks, self.options.snippet_max_length);
        tracing::info!(
            "Answer generated ({} chars, {} source(s))",
            answer.chars().count(),
            sources.len()
        );

        Ok(AskOutcome {
            question: question.to_string(),
            answer,
            sources,
            chunks_retrieved: chunks.len(),
        })
    }

    fn render_prompt(
        &self,
        context: &str,
        question: &str,
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        let turns: Vec<&ConversationTurn> = history
            .iter()
            .filter(|turn| matches!(turn.role.as_str(), "user" | "assistant"))
            .collect();
        let start = turns.len().saturating_sub(self.options.max_history_turns);

        let mut messages = Vec::with_capacity(turns.len() - start + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        for turn in &turns[start..] {
            messages.push(ChatMessage::new(turn.role.clone(), turn.content.clone()));
        }
        messages.push(ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            context, question
        )));
        messages
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::EmbeddingProvider;
    use crate::rag::cache::testing::CountingLoader;
    use crate::rag::cache::IndexCache;
    use crate::rag::store::IndexedDocument;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn model_id(&self) -> &str {
            "unit"
        }
    }

    /// Echoes a canned answer and records every request it sees.
    #[derive(Default)]
    struct RecordingGenerator {
        requests: StdMutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn name(&self) -> &str {
            "recording"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn generate(&self, request: ChatRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            Ok("  Paris is the capital.  ".to_string())
        }
    }

    fn pipeline(
        results: Vec<(IndexedDocument, f32)>,
        options: PipelineOptions,
    ) -> (QaPipeline, Arc<RecordingGenerator>) {
        let cache = Arc::new(IndexCache::new(Arc::new(CountingLoader::with_results(results))));
        let retriever = Arc::new(Retriever::new(cache, Arc::new(UnitEmbedder)));
        let generator = Arc::new(RecordingGenerator::default());
        (
            QaPipeline::new(retriever, generator.clone(), options),
            generator,
        )
    }

    fn doc(text: &str, source: &str) -> IndexedDocument {
        IndexedDocument::new(text).with_source(source).with_start_index(0)
    }

    #[tokio::test]
    async fn answers_with_deduplicated_sources() {
        let (pipeline, generator) = pipeline(
            vec![
                (doc("Paris is in France.", "docs/geo.md"), 0.2),
                (doc("France capital: Paris.", "docs/geo.md"), 0.1),
                (doc("Population facts.", "docs/stats.md"), 0.6),
            ],
            PipelineOptions::default(),
        );

        let outcome = pipeline.ask(AskRequest::new("  capital of France?  ")).await.unwrap();
        assert_eq!(outcome.question, "capital of France?");
        assert_eq!(outcome.answer, "Paris is the capital.");
        assert_eq!(outcome.chunks_retrieved, 3);
        assert_eq!(outcome.sources.len(), 2);
        assert_eq!(outcome.sources[0].filename, "geo.md");
        assert_eq!(outcome.sources[0].snippet, "France capital: Paris.");

        let requests = generator.requests.lock().unwrap();
        let prompt = &requests[0].messages.last().unwrap().content;
        assert!(prompt.contains("[Source: geo.md]\nParis is in France."));
        assert!(prompt.contains("Question: capital of France?"));
        assert_eq!(requests[0].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn empty_retrieval_skips_the_generator() {
        let (pipeline, generator) = pipeline(
            vec![(doc("far away", "a.md"), 3.0)],
            PipelineOptions {
                score_threshold: 0.3,
                ..PipelineOptions::default()
            },
        );

        let outcome = pipeline.ask(AskRequest::new("anything")).await.unwrap();
        assert_eq!(outcome.answer, NO_ANSWER_FALLBACK);
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.chunks_retrieved, 0);
        assert!(generator.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_bad_questions_and_top_k() {
        let (pipeline, _) = pipeline(
            Vec::new(),
            PipelineOptions {
                max_question_length: 10,
                ..PipelineOptions::default()
            },
        );

        for request in [
            AskRequest::new("   "),
            AskRequest::new("this question is far too long"),
            AskRequest {
                top_k: Some(0),
                ..AskRequest::new("ok")
            },
            AskRequest {
                top_k: Some(21),
                ..AskRequest::new("ok")
            },
        ] {
            assert!(matches!(
                pipeline.ask(request).await,
                Err(RagError::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn top_k_override_limits_retrieval() {
        let (pipeline, _) = pipeline(
            vec![
                (doc("one", "a.md"), 0.1),
                (doc("two", "b.md"), 0.2),
                (doc("three", "c.md"), 0.3),
            ],
            PipelineOptions::default(),
        );
        let outcome = pipeline
            .ask(AskRequest {
                top_k: Some(2),
                ..AskRequest::new("q")
            })
            .await
            .unwrap();
        assert_eq!(outcome.chunks_retrieved, 2);
    }

    #[tokio::test]
    async fn prompt_keeps_recent_user_and_assistant_turns() {
        let (pipeline, generator) = pipeline(
            vec![(doc("ctx", "a.md"), 0.0)],
            PipelineOptions {
                max_history_turns: 2,
                ..PipelineOptions::default()
            },
        );
        let history = vec![
            ConversationTurn { role: "user".into(), content: "old".into() },
            ConversationTurn { role: "system".into(), content: "ignore me".into() },
            ConversationTurn { role: "assistant".into(), content: "mid".into() },
            ConversationTurn { role: "user".into(), content: "latest".into() },
        ];

        pipeline
            .ask(AskRequest {
                conversation_history: history,
                ..AskRequest::new("q")
            })
            .await
            .unwrap();

        let requests = generator.requests.lock().unwrap();
        let roles: Vec<&str> = requests[0].messages.iter().map(|m| m.role.as_str()).collect();
        let contents: Vec<&str> = requests[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user", "user"]);
        assert_eq!(contents[1], "mid");
        assert_eq!(contents[2], "latest");
    }

    #[tokio::test]
    async fn missing_index_propagates_as_unavailable() {
        let cache = Arc::new(IndexCache::new(Arc::new(CountingLoader::missing())));
        let retriever = Arc::new(Retriever::new(cache, Arc::new(UnitEmbedder)));
        let pipeline = QaPipeline::new(
            retriever,
            Arc::new(RecordingGenerator::default()),
            PipelineOptions::default(),
        );
        assert!(matches!(
            pipeline.ask(AskRequest::new("q")).await,
            Err(RagError::IndexUnavailable(_))
        ));
    }
}
