//! Retrieval-Augmented Query Pipeline
//!
//! Orchestrates one user question end to end: retrieve similar historical
//! queries, inject schema context, build a persona prompt, call the
//! generation model once, extract SQL from the output and validate it. The
//! pipeline boundary never lets an exception escape: every failure becomes
//! a `PipelineResponse` carrying a distinct error code, and soft outcomes
//! (no SQL extracted, a DENY verdict) are reported data, not errors.

use crate::extraction::{ExtractedSql, SqlExtractor};
use crate::llm::{GenerationModel, TokenUsage};
use crate::prompts::{self, AgentKind, ConversationTurn};
use crate::retrieval::{RetrievedCandidate, VectorIndex};
use crate::schema::SchemaCatalog;
use crate::sql_guard::validator::{self, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Machine-readable failure codes surfaced to callers. Soft outcomes (no
/// SQL, validation DENY) have no code; they live in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EmptyQuestion,
    IndexUnavailable,
    GenerationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineError {
    pub code: ErrorCode,
    pub message: String,
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub agent: AgentKind,
    pub top_k: usize,
    pub schema_injection: bool,
    pub sql_validation: bool,
    pub history: Vec<ConversationTurn>,
    /// Overrides the pipeline's default generation timeout when set.
    pub generation_timeout: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            agent: AgentKind::Default,
            top_k: 5,
            schema_injection: true,
            sql_validation: true,
            history: Vec::new(),
            generation_timeout: None,
        }
    }
}

/// Terminal artifact of one pipeline invocation; ownership transfers to
/// the caller for rendering or storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// The model's full answer text (empty on hard failure)
    pub answer: String,
    /// Extracted SQL, when any strategy produced an accepted candidate
    pub sql: Option<ExtractedSql>,
    /// Safety verdict for the extracted SQL, when validation ran
    pub verdict: Option<Verdict>,
    /// Convenience view of the verdict: None when no validation ran
    pub sql_validated: Option<bool>,
    pub sources: Vec<RetrievedCandidate>,
    pub usage: TokenUsage,
    pub processing_time_ms: u64,
    pub error: Option<PipelineError>,
}

impl PipelineResponse {
    fn empty(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            answer: String::new(),
            sql: None,
            verdict: None,
            sql_validated: None,
            sources: Vec::new(),
            usage: TokenUsage::default(),
            processing_time_ms: 0,
            error: None,
        }
    }

    fn failed(request_id: String, code: ErrorCode, message: &str, elapsed_ms: u64) -> Self {
        let mut response = Self::empty(request_id);
        response.processing_time_ms = elapsed_ms;
        response.error = Some(PipelineError {
            code,
            message: message.to_string(),
        });
        response
    }
}

/// The assistant core. Collaborators are explicit constructor parameters
/// so tests substitute deterministic doubles; all shared state (catalog,
/// index) is read-only after construction.
pub struct QueryPipeline {
    index: Arc<dyn VectorIndex>,
    catalog: Arc<SchemaCatalog>,
    model: Arc<dyn GenerationModel>,
    extractor: SqlExtractor,
    dataset_scope: Option<Vec<String>>,
    generation_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        catalog: Arc<SchemaCatalog>,
        model: Arc<dyn GenerationModel>,
    ) -> Self {
        let extractor = SqlExtractor::with_model_assist(Arc::clone(&model));
        Self {
            index,
            catalog,
            model,
            extractor,
            dataset_scope: None,
            generation_timeout: Duration::from_secs(60),
        }
    }

    /// Validate extracted SQL against this dataset scope as well.
    pub fn with_dataset_scope(mut self, scope: Vec<String>) -> Self {
        self.dataset_scope = Some(scope);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Run one question through the full pipeline. Never panics and never
    /// returns an error: failures are encoded in the response.
    pub async fn run_query(&self, question: &str, options: QueryOptions) -> PipelineResponse {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut usage = TokenUsage::default();

        // Step 1: reject empty input before any collaborator is touched.
        let question = question.trim();
        if question.is_empty() {
            return PipelineResponse::failed(
                request_id,
                ErrorCode::EmptyQuestion,
                "Question is empty",
                started.elapsed().as_millis() as u64,
            );
        }

        info!(request_id = %request_id, top_k = options.top_k, "Running query pipeline");

        // Step 2: retrieve similar historical queries.
        let candidates = match self.index.search(question, options.top_k).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(request_id = %request_id, "Retrieval failed: {}", e);
                return PipelineResponse::failed(
                    request_id,
                    ErrorCode::IndexUnavailable,
                    "The query index is unavailable; load or rebuild it first",
                    started.elapsed().as_millis() as u64,
                );
            }
        };
        info!(request_id = %request_id, hits = candidates.len(), "Retrieved candidates");

        // Step 3: derive the referenced tables and render their schema.
        let schema_description = if options.schema_injection {
            let tables = referenced_tables(&candidates);
            let rendered = self
                .catalog
                .render_for_tables(tables.iter().map(String::as_str));
            if rendered.is_empty() {
                None
            } else {
                Some(rendered)
            }
        } else {
            None
        };

        // Step 4: compose the persona prompt.
        let prompt = prompts::build_prompt(
            options.agent,
            schema_description.as_deref(),
            &options.history,
            &candidates,
            question,
        );

        // Step 5: one bounded generation call; no retries here, the caller
        // owns retry policy and its failure accounting.
        let timeout = options.generation_timeout.unwrap_or(self.generation_timeout);
        let output = match tokio::time::timeout(timeout, self.model.generate(&prompt)).await {
            Err(_) => {
                return PipelineResponse::failed(
                    request_id,
                    ErrorCode::GenerationFailed,
                    &format!("Generation timed out after {}s", timeout.as_secs()),
                    started.elapsed().as_millis() as u64,
                );
            }
            Ok(Err(e)) => {
                warn!(request_id = %request_id, "Generation failed: {}", e);
                return PipelineResponse::failed(
                    request_id,
                    ErrorCode::GenerationFailed,
                    "The generation model call failed",
                    started.elapsed().as_millis() as u64,
                );
            }
            Ok(Ok(output)) => output,
        };
        usage.add(output.usage);

        // Step 6: extract SQL from the raw model output. "No SQL" is fine.
        let (extracted, extraction_usage) = self.extractor.extract_sql(&output.text, true).await;
        usage.add(extraction_usage);

        // Step 7: validate when asked to; DENY is attached, not raised.
        let verdict = match (&extracted, options.sql_validation) {
            (Some(sql), true) => Some(validator::validate(
                &sql.text,
                self.dataset_scope.as_deref(),
            )),
            _ => None,
        };
        let sql_validated = verdict.as_ref().map(|v: &Verdict| v.is_valid);

        // Step 8: assemble the response.
        let mut response = PipelineResponse::empty(request_id);
        response.answer = output.text;
        response.sql = extracted;
        response.verdict = verdict;
        response.sql_validated = sql_validated;
        response.sources = candidates;
        response.usage = usage;
        response.processing_time_ms = started.elapsed().as_millis() as u64;
        response
    }

    /// Ad-hoc validation entry point for callers (e.g. a "fix broken SQL"
    /// flow). Uses the pipeline's dataset scope when one is configured.
    pub fn validate(&self, sql: &str) -> Verdict {
        validator::validate(sql, self.dataset_scope.as_deref())
    }
}

/// Union of the tables named by the retrieved candidates' metadata, first
/// appearance order, case-insensitive dedup.
fn referenced_tables(candidates: &[RetrievedCandidate]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for candidate in candidates {
        for table in &candidate.source.tables {
            let known = tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(table));
            if !known {
                tables.push(table.clone());
            }
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SourceMeta;

    fn candidate_with_tables(tables: Vec<&str>) -> RetrievedCandidate {
        RetrievedCandidate {
            content: "q".to_string(),
            score: 0.5,
            source: SourceMeta {
                sql: None,
                description: None,
                tables: tables.into_iter().map(String::from).collect(),
            },
        }
    }

    #[test]
    fn test_referenced_tables_deduplicates() {
        let candidates = vec![
            candidate_with_tables(vec!["products", "orders"]),
            candidate_with_tables(vec!["Products", "customers"]),
        ];
        let tables = referenced_tables(&candidates);
        assert_eq!(tables, vec!["products", "orders", "customers"]);
    }

    #[test]
    fn test_default_options() {
        let options = QueryOptions::default();
        assert_eq!(options.agent, AgentKind::Default);
        assert_eq!(options.top_k, 5);
        assert!(options.schema_injection);
        assert!(options.sql_validation);
    }
}
