//! The agentic answer pipeline.
//!
//! plan → rewrite (fan-out) → per-variant retrieval → RRF fusion →
//! generate → judge → conditional widened re-retrieval → optional summary.
//! Judge iterations accumulate previous result sets into the fusion
//! rather than replacing them.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::prompt::{
    ANSWER_SYSTEM_PROMPT, build_answer_prompt, build_judge_prompt, build_rewrite_prompt,
    build_summary_prompt,
};
use super::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, system_message, user_message,
};
use super::strip_code_fences;
use crate::config::{Settings, Strictness};
use crate::embedding::EmbeddingProvider;
use crate::error::AgentError;
use crate::search::{SearchHit, fuse_hits, search};
use crate::storage::DocumentStore;

/// Retrieval plan for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPlan {
    /// Whether retrieval-augmented generation is used.
    pub use_rag: bool,
    /// Number of query rewrites to fan out.
    pub rewrites: usize,
}

/// Plans the retrieval strategy.
///
/// Currently always retrieval-augmented with a configurable rewrite
/// fan-out.
pub struct Planner;

impl Planner {
    /// Produces the plan for a query.
    #[must_use]
    pub const fn plan(rewrites: usize) -> QueryPlan {
        QueryPlan {
            use_rag: true,
            rewrites,
        }
    }
}

/// Judge verdict over a generated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the answer acceptably addresses the question.
    pub ok: bool,
    /// Whether another, wider retrieval round is warranted.
    #[serde(default)]
    pub needs_more: bool,
    /// Judge rationale.
    #[serde(default)]
    pub reason: String,
}

/// A source citation attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// Chunk id.
    pub chunk_id: i64,
    /// Owning document id.
    pub document_id: i64,
    /// Owning document filename.
    pub filename: String,
    /// Chunk content as indexed.
    pub content: String,
    /// Fused relevance score.
    pub score: f64,
    /// Chunk metadata.
    pub metadata: Value,
}

impl From<&SearchHit> for Citation {
    fn from(hit: &SearchHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            filename: hit.filename.clone(),
            content: hit.content.clone(),
            score: hit.score,
            metadata: hit.metadata.clone(),
        }
    }
}

/// Final response of the answer pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    /// Generated answer.
    pub answer: String,
    /// Source citations for the fused hits.
    pub citations: Vec<Citation>,
    /// Original query.
    pub query: String,
    /// Judge verdict on the final answer.
    pub verdict: Verdict,
    /// Optional two-sentence summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Pipeline tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Query rewrites per question.
    pub rewrites: usize,
    /// Initial retrieval depth.
    pub top_k: usize,
    /// RRF k parameter.
    pub rrf_k: u32,
    /// Retrieval-depth increment per judge iteration.
    pub widen_step: usize,
    /// Retrieval-depth ceiling.
    pub max_top_k: usize,
    /// Maximum judge-driven re-retrieval iterations.
    pub max_iterations: usize,
    /// Judge strictness.
    pub strictness: Strictness,
    /// Whether to produce the optional summary.
    pub summarize: bool,
}

impl PipelineConfig {
    /// Derives the pipeline configuration from engine settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rewrites: settings.agent_rewrites,
            top_k: settings.rag_top_k,
            rrf_k: 60,
            widen_step: 5,
            max_top_k: 20,
            max_iterations: 2,
            strictness: settings.judge_strictness,
            summarize: false,
        }
    }
}

/// The plan → rewrite → retrieve → generate → judge pipeline.
pub struct AnswerPipeline {
    store: Arc<Mutex<DocumentStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    config: PipelineConfig,
}

impl AnswerPipeline {
    /// Creates the pipeline over the shared store and capabilities.
    #[must_use]
    pub fn new(
        store: Arc<Mutex<DocumentStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    /// Answers a query with citations, a judge verdict, and an optional
    /// summary.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on empty queries or when generation or
    /// retrieval-side capabilities fail. No partial answers are returned.
    pub async fn answer(
        &self,
        query: &str,
        owner_id: i64,
        top_k: Option<usize>,
    ) -> Result<AnswerResponse, AgentError> {
        if query.trim().is_empty() {
            return Err(AgentError::InvalidQuery {
                message: "query cannot be empty".to_string(),
            });
        }

        let plan = Planner::plan(self.config.rewrites);
        debug!(rewrites = plan.rewrites, "query planned");

        let rewrites = if plan.rewrites > 0 {
            self.rewrite(query, plan.rewrites).await
        } else {
            Vec::new()
        };

        let mut variants = vec![query.to_string()];
        variants.extend(rewrites);

        let mut top_k = top_k.unwrap_or(self.config.top_k).clamp(1, self.config.max_top_k);
        let mut accumulated: Vec<Vec<SearchHit>> = Vec::new();

        self.search_round(&variants, query, owner_id, top_k, &mut accumulated)
            .await?;
        let mut fused = fuse_hits(&accumulated, self.config.rrf_k, top_k);

        if fused.is_empty() {
            return Ok(AnswerResponse {
                answer: "I couldn't find any relevant information to answer your question."
                    .to_string(),
                citations: Vec::new(),
                query: query.to_string(),
                verdict: Verdict {
                    ok: true,
                    needs_more: false,
                    reason: "no results retrieved".to_string(),
                },
                summary: None,
            });
        }

        let mut answer = self.generate(query, &fused).await?;
        let mut verdict = self.judge(query, &answer, &fused).await;

        // Widen, accumulate, re-fuse, regenerate while the judge wants more
        let mut iteration = 0;
        while verdict.needs_more && iteration < self.config.max_iterations {
            top_k = (top_k + self.config.widen_step).min(self.config.max_top_k);
            info!(iteration, top_k, "judge requested wider retrieval");

            self.search_round(&variants, query, owner_id, top_k, &mut accumulated)
                .await?;
            fused = fuse_hits(&accumulated, self.config.rrf_k, top_k);
            answer = self.generate(query, &fused).await?;
            verdict = self.judge(query, &answer, &fused).await;
            iteration += 1;
        }

        let summary = if self.config.summarize && !answer.is_empty() {
            self.summarize(&answer).await
        } else {
            None
        };

        Ok(AnswerResponse {
            citations: fused.iter().map(Citation::from).collect(),
            answer,
            query: query.to_string(),
            verdict,
            summary,
        })
    }

    /// One retrieval round: a vector search per variant plus one lexical
    /// search for the original query, appended to the accumulated sets.
    async fn search_round(
        &self,
        variants: &[String],
        query: &str,
        owner_id: i64,
        top_k: usize,
        accumulated: &mut Vec<Vec<SearchHit>>,
    ) -> Result<(), AgentError> {
        let vector_rounds = join_all(variants.iter().map(|variant| async move {
            let embedding = self.embedder.embed(variant).await.map_err(|e| {
                AgentError::ApiRequest {
                    message: format!("query embedding failed: {e}"),
                }
            })?;
            let store = self.store.lock().await;
            search(&store, None, Some(&embedding), owner_id, top_k).map_err(|e| {
                AgentError::ApiRequest {
                    message: format!("vector search failed: {e}"),
                }
            })
        }))
        .await;

        for round in vector_rounds {
            accumulated.push(round?);
        }

        let lexical = {
            let store = self.store.lock().await;
            search(&store, Some(query), None, owner_id, top_k).map_err(|e| {
                AgentError::ApiRequest {
                    message: format!("lexical search failed: {e}"),
                }
            })?
        };
        accumulated.push(lexical);
        Ok(())
    }

    /// Asks for paraphrases; any failure degrades to no rewrites.
    async fn rewrite(&self, query: &str, n: usize) -> Vec<String> {
        let prompt = build_rewrite_prompt(query, n);
        match self.llm.complete_simple(&[user_message(&prompt)]).await {
            Ok(content) => content
                .lines()
                .map(|line| {
                    line.trim()
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || c == '.' || c == ')' || c == '-'
                        })
                        .trim()
                        .to_string()
                })
                .filter(|line| !line.is_empty())
                .take(n)
                .collect(),
            Err(err) => {
                warn!(error = %err, "rewrite failed, continuing without rewrites");
                Vec::new()
            }
        }
    }

    async fn generate(&self, query: &str, hits: &[SearchHit]) -> Result<String, AgentError> {
        let request = CompletionRequest {
            messages: vec![
                system_message(ANSWER_SYSTEM_PROMPT),
                user_message(&build_answer_prompt(query, hits)),
            ],
            temperature: Some(0.7),
            max_tokens: Some(500),
            json_mode: false,
        };
        let CompletionResponse { content } = self.llm.complete(&request).await?;
        Ok(content.trim().to_string())
    }

    /// Judges the answer; judge unavailability degrades to an accepting
    /// verdict with the failure recorded.
    async fn judge(&self, query: &str, answer: &str, hits: &[SearchHit]) -> Verdict {
        let prompt = build_judge_prompt(query, answer, hits, self.config.strictness);
        match self.llm.complete_json(&[user_message(&prompt)]).await {
            Ok(content) => match serde_json::from_str::<Verdict>(strip_code_fences(&content)) {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(error = %err, "judge returned unparsable verdict");
                    Verdict {
                        ok: true,
                        needs_more: false,
                        reason: format!("judge verdict unparsable: {err}"),
                    }
                }
            },
            Err(err) => {
                warn!(error = %err, "judge unavailable");
                Verdict {
                    ok: true,
                    needs_more: false,
                    reason: format!("judge unavailable: {err}"),
                }
            }
        }
    }

    async fn summarize(&self, answer: &str) -> Option<String> {
        let prompt = build_summary_prompt(answer);
        match self.llm.complete_simple(&[user_message(&prompt)]).await {
            Ok(summary) => Some(summary.trim().to_string()),
            Err(err) => {
                warn!(error = %err, "summary generation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const DIM: usize = 128;

    /// Scripted provider: answers by request kind, records judge calls.
    struct ScriptedLlm {
        rewrites: String,
        judge_verdicts: StdMutex<Vec<String>>,
        generate_calls: StdMutex<usize>,
        fail_rewrites: bool,
    }

    impl ScriptedLlm {
        fn accepting() -> Self {
            Self {
                rewrites: "variant one\nvariant two".to_string(),
                judge_verdicts: StdMutex::new(vec![
                    r#"{"ok": true, "needs_more": false, "reason": "fine"}"#.to_string(),
                ]),
                generate_calls: StdMutex::new(0),
                fail_rewrites: false,
            }
        }

        fn demanding(verdicts: Vec<&str>) -> Self {
            Self {
                rewrites: String::new(),
                judge_verdicts: StdMutex::new(
                    verdicts.into_iter().rev().map(ToString::to_string).collect(),
                ),
                generate_calls: StdMutex::new(0),
                fail_rewrites: false,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, AgentError> {
            let prompt = &request.messages.last().map(|m| m.content.clone()).unwrap_or_default();

            if request.json_mode {
                let verdict = self
                    .judge_verdicts
                    .lock()
                    .unwrap()
                    .pop()
                    .unwrap_or_else(|| {
                        r#"{"ok": true, "needs_more": false, "reason": "default"}"#.to_string()
                    });
                return Ok(CompletionResponse { content: verdict });
            }

            if prompt.contains("alternative phrasings") {
                if self.fail_rewrites {
                    return Err(AgentError::ApiRequest {
                        message: "rewrite down".to_string(),
                    });
                }
                return Ok(CompletionResponse {
                    content: self.rewrites.clone(),
                });
            }

            if prompt.contains("two sentences") {
                return Ok(CompletionResponse {
                    content: "A summary.".to_string(),
                });
            }

            *self.generate_calls.lock().unwrap() += 1;
            Ok(CompletionResponse {
                content: "Generated grounded answer.".to_string(),
            })
        }
    }

    async fn seeded_pipeline(llm: ScriptedLlm) -> AnswerPipeline {
        let embedder = Arc::new(HashedEmbedder::new(DIM));

        let mut store = DocumentStore::in_memory().unwrap();
        store.init().unwrap();
        let doc_id = store.insert_document("kb.txt", None, 1, 1).unwrap();

        let texts = [
            "Rust is a systems programming language focused on safety",
            "The borrow checker enforces memory safety at compile time",
            "Cargo is the Rust package manager and build tool",
        ];
        let rows: Vec<(usize, String, Value, Vec<f32>)> =
            join_all(texts.iter().enumerate().map(|(i, t)| {
                let embedder = Arc::clone(&embedder);
                async move {
                    (
                        i,
                        (*t).to_string(),
                        serde_json::json!({}),
                        embedder.embed(t).await.unwrap(),
                    )
                }
            }))
            .await;
        store.insert_chunks(doc_id, &rows).unwrap();

        let config = PipelineConfig {
            rewrites: 2,
            top_k: 3,
            rrf_k: 60,
            widen_step: 5,
            max_top_k: 20,
            max_iterations: 2,
            strictness: Strictness::Medium,
            summarize: false,
        };

        AnswerPipeline::new(
            Arc::new(Mutex::new(store)),
            embedder,
            Arc::new(llm),
            config,
        )
    }

    #[test]
    fn test_planner_always_rag() {
        let plan = Planner::plan(3);
        assert!(plan.use_rag);
        assert_eq!(plan.rewrites, 3);
    }

    #[tokio::test]
    async fn test_answer_happy_path() {
        let pipeline = seeded_pipeline(ScriptedLlm::accepting()).await;
        let response = pipeline
            .answer("what is the borrow checker", 1, None)
            .await
            .unwrap();

        assert_eq!(response.answer, "Generated grounded answer.");
        assert!(response.verdict.ok);
        assert!(!response.citations.is_empty());
        assert!(response.citations.iter().all(|c| c.filename == "kb.txt"));
        assert_eq!(response.query, "what is the borrow checker");
        assert!(response.summary.is_none());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let pipeline = seeded_pipeline(ScriptedLlm::accepting()).await;
        let result = pipeline.answer("   ", 1, None).await;
        assert!(matches!(result, Err(AgentError::InvalidQuery { .. })));
    }

    #[tokio::test]
    async fn test_no_results_short_circuits() {
        let pipeline = seeded_pipeline(ScriptedLlm::accepting()).await;
        // Owner 99 has no documents
        let response = pipeline.answer("anything", 99, None).await.unwrap();
        assert!(response.answer.contains("couldn't find"));
        assert!(response.citations.is_empty());
        assert_eq!(response.verdict.reason, "no results retrieved");
    }

    #[tokio::test]
    async fn test_judge_loop_regenerates() {
        let llm = ScriptedLlm::demanding(vec![
            r#"{"ok": false, "needs_more": true, "reason": "thin context"}"#,
            r#"{"ok": true, "needs_more": false, "reason": "better"}"#,
        ]);
        let pipeline = seeded_pipeline(llm).await;

        let response = pipeline.answer("explain cargo", 1, None).await.unwrap();
        assert!(response.verdict.ok);
        assert_eq!(response.verdict.reason, "better");
    }

    #[tokio::test]
    async fn test_judge_loop_bounded() {
        // Judge never satisfied: loop must stop after max_iterations
        let llm = ScriptedLlm::demanding(vec![
            r#"{"ok": false, "needs_more": true, "reason": "more"}"#,
            r#"{"ok": false, "needs_more": true, "reason": "more"}"#,
            r#"{"ok": false, "needs_more": true, "reason": "more"}"#,
            r#"{"ok": false, "needs_more": true, "reason": "more"}"#,
        ]);
        let pipeline = seeded_pipeline(llm).await;

        let response = pipeline.answer("explain cargo", 1, None).await.unwrap();
        // 1 initial + 2 iterations, still unsatisfied
        assert!(!response.verdict.ok);
        assert!(response.verdict.needs_more);
    }

    #[tokio::test]
    async fn test_rewrite_failure_degrades_gracefully() {
        let llm = ScriptedLlm {
            rewrites: String::new(),
            judge_verdicts: StdMutex::new(vec![]),
            generate_calls: StdMutex::new(0),
            fail_rewrites: true,
        };
        let pipeline = seeded_pipeline(llm).await;

        let response = pipeline.answer("what is rust", 1, None).await.unwrap();
        assert!(!response.answer.is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_parsing_strips_numbering() {
        let pipeline = seeded_pipeline(ScriptedLlm::accepting()).await;
        let llm_numbered = ScriptedLlm {
            rewrites: "1. first variant\n2) second variant\n- third".to_string(),
            judge_verdicts: StdMutex::new(vec![]),
            generate_calls: StdMutex::new(0),
            fail_rewrites: false,
        };
        let _ = pipeline;
        let rewrites_pipeline = seeded_pipeline(llm_numbered).await;
        let rewrites = rewrites_pipeline.rewrite("q", 3).await;
        assert_eq!(rewrites, vec!["first variant", "second variant", "third"]);
    }

    #[tokio::test]
    async fn test_unparsable_verdict_accepts() {
        let llm = ScriptedLlm::demanding(vec!["not json at all"]);
        let pipeline = seeded_pipeline(llm).await;

        let response = pipeline.answer("what is rust", 1, None).await.unwrap();
        assert!(response.verdict.ok);
        assert!(response.verdict.reason.contains("unparsable"));
    }

    #[tokio::test]
    async fn test_summarize_enabled() {
        let mut pipeline = seeded_pipeline(ScriptedLlm::accepting()).await;
        pipeline.config.summarize = true;

        let response = pipeline.answer("what is rust", 1, None).await.unwrap();
        assert_eq!(response.summary.as_deref(), Some("A summary."));
    }
}
