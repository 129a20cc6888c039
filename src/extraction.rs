//! Text-to-SQL Extractor
//!
//! Recovers at most one SQL statement from free-form model output (prose,
//! markdown fences, several candidate snippets). Strategies are an ordered
//! list tried in turn, the first accepted candidate wins: fenced block,
//! then statement boundary, then model-assisted extraction. "No SQL found"
//! is a normal `None` outcome, not an error.

use crate::llm::{GenerationModel, TokenUsage};
use crate::prompts;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum candidate length for strategies that scan raw prose. Fenced
/// blocks are explicitly delimited by the model and skip this floor, so a
/// short fenced statement like `SELECT 1` is still accepted.
const MIN_CANDIDATE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    FencedBlock,
    StatementBoundary,
    ModelAssisted,
}

/// Coarse confidence indicator derived from the strategy that produced the
/// candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The single statement chosen from one extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSql {
    pub text: String,
    pub method: ExtractionMethod,
    pub confidence: Confidence,
}

/// Result of one strategy attempt. `usage` is non-zero only for strategies
/// that call a model.
#[derive(Debug, Default)]
pub struct StrategyAttempt {
    pub candidate: Option<String>,
    pub usage: TokenUsage,
}

/// One extraction strategy. Strategies never error: a failed attempt is an
/// empty candidate.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Whether this strategy calls a generation model; gated by the
    /// caller's `allow_model_assist` flag.
    fn uses_model(&self) -> bool {
        false
    }

    async fn attempt(&self, text: &str) -> StrategyAttempt;
}

lazy_static! {
    static ref FENCED_BLOCK_RE: Regex =
        Regex::new(r"(?is)```(?:sql)?[ \t]*\r?\n?(.*?)```").unwrap();
    // DML starts are recognized as SQL on purpose; rejecting them is the
    // validator's job, not the extractor's.
    static ref STATEMENT_BOUNDARY_RE: Regex =
        Regex::new(r"(?is)\b(?:select|with|insert|update|delete)\b.*?(?:;|\z)").unwrap();
    static ref SQL_KEYWORD_RE: Regex =
        Regex::new(r"(?i)\b(select|with|insert|update|delete)\b").unwrap();
}

/// Markdown code fence, tagged `sql` or untagged.
pub struct FencedBlockStrategy;

#[async_trait]
impl ExtractionStrategy for FencedBlockStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::FencedBlock
    }

    async fn attempt(&self, text: &str) -> StrategyAttempt {
        for captures in FENCED_BLOCK_RE.captures_iter(text) {
            if let Some(content) = captures.get(1) {
                let candidate = content.as_str().trim();
                if !candidate.is_empty() {
                    return StrategyAttempt {
                        candidate: Some(candidate.to_string()),
                        usage: TokenUsage::default(),
                    };
                }
            }
        }
        StrategyAttempt::default()
    }
}

/// Slice from the first statement keyword to the next semicolon or end of
/// text.
pub struct StatementBoundaryStrategy;

#[async_trait]
impl ExtractionStrategy for StatementBoundaryStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::StatementBoundary
    }

    async fn attempt(&self, text: &str) -> StrategyAttempt {
        let candidate = STATEMENT_BOUNDARY_RE
            .find(text)
            .map(|m| m.as_str().trim().trim_end_matches(';').trim().to_string())
            .filter(|c| !c.is_empty());
        StrategyAttempt {
            candidate,
            usage: TokenUsage::default(),
        }
    }
}

/// Ask the generation model to pull out the SQL, with a sentinel reply for
/// "there is none". Model errors degrade to a failed attempt.
pub struct ModelAssistStrategy {
    model: Arc<dyn GenerationModel>,
}

impl ModelAssistStrategy {
    pub fn new(model: Arc<dyn GenerationModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ExtractionStrategy for ModelAssistStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::ModelAssisted
    }

    fn uses_model(&self) -> bool {
        true
    }

    async fn attempt(&self, text: &str) -> StrategyAttempt {
        let prompt = prompts::build_extraction_assist_prompt(text);
        match self.model.generate(&prompt).await {
            Ok(output) => {
                let reply = output.text.trim();
                if reply.is_empty() || reply.contains(prompts::NO_SQL_SENTINEL) {
                    return StrategyAttempt {
                        candidate: None,
                        usage: output.usage,
                    };
                }
                // The assist model sometimes fences its own answer.
                let candidate = FENCED_BLOCK_RE
                    .captures(reply)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str())
                    .unwrap_or(reply)
                    .trim()
                    .to_string();
                StrategyAttempt {
                    candidate: Some(candidate).filter(|c| !c.is_empty()),
                    usage: output.usage,
                }
            }
            Err(e) => {
                warn!("Model-assisted extraction failed: {}", e);
                StrategyAttempt::default()
            }
        }
    }
}

/// Ordered strategy runner. Construct with `new` for the pure pattern
/// strategies or `with_model_assist` to append the model-backed fallback.
pub struct SqlExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl SqlExtractor {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(FencedBlockStrategy),
                Box::new(StatementBoundaryStrategy),
            ],
        }
    }

    pub fn with_model_assist(model: Arc<dyn GenerationModel>) -> Self {
        let mut extractor = Self::new();
        extractor
            .strategies
            .push(Box::new(ModelAssistStrategy::new(model)));
        extractor
    }

    /// Run the strategies in order and return the first accepted candidate
    /// plus the token usage of every model call made along the way.
    pub async fn extract_sql(
        &self,
        text: &str,
        allow_model_assist: bool,
    ) -> (Option<ExtractedSql>, TokenUsage) {
        let mut usage = TokenUsage::default();
        if text.trim().is_empty() {
            return (None, usage);
        }

        for strategy in &self.strategies {
            if strategy.uses_model() && !allow_model_assist {
                continue;
            }
            let attempt = strategy.attempt(text).await;
            usage.add(attempt.usage);

            if let Some(candidate) = attempt.candidate {
                if accept_candidate(&candidate, strategy.method()) {
                    debug!(method = ?strategy.method(), "Extracted SQL candidate");
                    return (
                        Some(ExtractedSql {
                            text: candidate,
                            confidence: confidence_for(strategy.method()),
                            method: strategy.method(),
                        }),
                        usage,
                    );
                }
            }
        }

        (None, usage)
    }
}

impl Default for SqlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// A candidate must look like SQL (carry a statement keyword) and, for the
/// prose-scanning strategies, clear a noise floor.
fn accept_candidate(candidate: &str, method: ExtractionMethod) -> bool {
    let trimmed = candidate.trim();
    if !SQL_KEYWORD_RE.is_match(trimmed) {
        return false;
    }
    match method {
        ExtractionMethod::FencedBlock => !trimmed.is_empty(),
        _ => trimmed.len() > MIN_CANDIDATE_LEN,
    }
}

fn confidence_for(method: ExtractionMethod) -> Confidence {
    match method {
        ExtractionMethod::FencedBlock => Confidence::High,
        ExtractionMethod::StatementBoundary => Confidence::Medium,
        ExtractionMethod::ModelAssisted => Confidence::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::GenerationOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedModel {
        reply: String,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationModel for FixedModel {
        async fn generate(&self, _prompt: &str) -> Result<GenerationOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationOutput {
                text: self.reply.clone(),
                usage: TokenUsage {
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    total_tokens: 10,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_fenced_sql_block_wins() {
        let extractor = SqlExtractor::new();
        let text = "Here is your query:\n```sql\nSELECT 1\n```\nExplanation follows.";
        let (extracted, usage) = extractor.extract_sql(text, false).await;
        let extracted = extracted.unwrap();
        assert_eq!(extracted.text, "SELECT 1");
        assert_eq!(extracted.method, ExtractionMethod::FencedBlock);
        assert_eq!(extracted.confidence, Confidence::High);
        assert_eq!(usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_untagged_fence_is_recognized() {
        let extractor = SqlExtractor::new();
        let text = "```\nSELECT name FROM products\n```";
        let (extracted, _) = extractor.extract_sql(text, false).await;
        assert_eq!(extracted.unwrap().text, "SELECT name FROM products");
    }

    #[tokio::test]
    async fn test_statement_boundary_from_prose() {
        let extractor = SqlExtractor::new();
        let text = "You could run SELECT name, price FROM products ORDER BY price; that should work.";
        let (extracted, _) = extractor.extract_sql(text, false).await;
        let extracted = extracted.unwrap();
        assert_eq!(
            extracted.text,
            "SELECT name, price FROM products ORDER BY price"
        );
        assert_eq!(extracted.method, ExtractionMethod::StatementBoundary);
    }

    #[tokio::test]
    async fn test_bare_dml_is_still_recognized_as_sql() {
        // Rejecting DELETE is the validator's call, not the extractor's.
        let extractor = SqlExtractor::new();
        let (extracted, _) = extractor.extract_sql("DELETE FROM products", false).await;
        assert_eq!(extracted.unwrap().text, "DELETE FROM products");
    }

    #[tokio::test]
    async fn test_no_sql_is_a_normal_none() {
        let extractor = SqlExtractor::new();
        let (extracted, usage) = extractor
            .extract_sql("I don't know the answer", false)
            .await;
        assert!(extracted.is_none());
        assert_eq!(usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_noise_match_is_rejected_by_length_floor() {
        let extractor = SqlExtractor::new();
        // "select" appears but the candidate is too short to be a statement.
        let (extracted, _) = extractor.extract_sql("select x", false).await;
        assert!(extracted.is_none());
    }

    #[tokio::test]
    async fn test_model_assist_is_last_and_gated() {
        let model = Arc::new(FixedModel::new("SELECT a FROM prose_table WHERE a > 1"));
        let extractor = SqlExtractor::with_model_assist(model.clone());
        let text = "The answer involves the prose_table rows above one.";

        // Gated off: no model call, no result.
        let (extracted, _) = extractor.extract_sql(text, false).await;
        assert!(extracted.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        // Gated on: model is consulted and usage is accounted.
        let (extracted, usage) = extractor.extract_sql(text, true).await;
        let extracted = extracted.unwrap();
        assert_eq!(extracted.method, ExtractionMethod::ModelAssisted);
        assert_eq!(extracted.confidence, Confidence::Low);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_model_assist_sentinel_means_no_sql() {
        let model = Arc::new(FixedModel::new("NO_SQL_FOUND"));
        let extractor = SqlExtractor::with_model_assist(model);
        let (extracted, usage) = extractor
            .extract_sql("Nothing SQL-shaped lives here.", true)
            .await;
        assert!(extracted.is_none());
        // The failed assist call still counts toward usage.
        assert_eq!(usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_first_fence_wins_over_later_candidates() {
        let extractor = SqlExtractor::new();
        let text = "```sql\nSELECT a FROM first\n```\nor maybe\n```sql\nSELECT b FROM second\n```";
        let (extracted, _) = extractor.extract_sql(text, false).await;
        assert_eq!(extracted.unwrap().text, "SELECT a FROM first");
    }
}
