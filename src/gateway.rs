//! Execution Gateway
//!
//! The only path from SQL text to the warehouse. The gateway re-validates
//! every statement itself immediately before execution; a caller's claim
//! that SQL "was already validated" is never trusted. Denied SQL never
//! touches the engine. Timeouts and billing ceilings are enforced here and
//! every failure comes back as a categorized `QueryExecutionResult`, never
//! as a propagated engine exception.

use crate::config::DEFAULT_MAX_BYTES_BILLED;
use crate::sql_guard::validator;
use crate::warehouse::{Row, WarehouseEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-call execution parameters. Unset fields fall back to the gateway's
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub dry_run: bool,
    pub max_bytes_billed: Option<u64>,
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Denied by the safety validator; the engine was never called
    Rejected,
    /// The engine did not answer within the timeout
    Timeout,
    /// The billing ceiling was exceeded
    BillingLimit,
    /// Any other engine-side failure
    EngineError,
}

/// Categorized failure detail. `message` is safe to show end users;
/// `detail` preserves the engine's own words for logs and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: Option<String>,
}

/// Outcome of one execution call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecutionResult {
    pub success: bool,
    pub rows: Vec<Row>,
    pub total_rows: u64,
    pub bytes_processed: u64,
    pub cache_hit: bool,
    pub execution_time_ms: u64,
    pub error: Option<ExecutionFailure>,
}

impl QueryExecutionResult {
    fn failure(kind: FailureKind, message: &str, detail: Option<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            total_rows: 0,
            bytes_processed: 0,
            cache_hit: false,
            execution_time_ms: elapsed_ms,
            error: Some(ExecutionFailure {
                kind,
                message: message.to_string(),
                detail,
            }),
        }
    }
}

/// Billing/timeout-bounded front door to the warehouse engine.
pub struct ExecutionGateway {
    engine: Arc<dyn WarehouseEngine>,
    dataset_scope: Option<Vec<String>>,
    default_max_bytes_billed: u64,
    default_timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(engine: Arc<dyn WarehouseEngine>) -> Self {
        Self {
            engine,
            dataset_scope: None,
            default_max_bytes_billed: DEFAULT_MAX_BYTES_BILLED,
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Restrict execution to tables within the given dataset scope.
    pub fn with_dataset_scope(mut self, scope: Vec<String>) -> Self {
        self.dataset_scope = Some(scope);
        self
    }

    pub fn with_default_max_bytes_billed(mut self, ceiling: u64) -> Self {
        self.default_max_bytes_billed = ceiling;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute `sql`, or estimate its cost when `request.dry_run` is set.
    /// Dry runs never return row data and never mutate warehouse state.
    pub async fn execute(&self, sql: &str, request: ExecutionRequest) -> QueryExecutionResult {
        let started = Instant::now();

        // Final guard: validate here no matter what the caller already did.
        let verdict = validator::validate(sql, self.dataset_scope.as_deref());
        if !verdict.is_valid {
            warn!("Refusing SQL rejected by safety validator: {}", verdict.message);
            return QueryExecutionResult::failure(
                FailureKind::Rejected,
                "SQL was rejected by the safety validator",
                Some(verdict.message),
                started.elapsed().as_millis() as u64,
            );
        }

        let ceiling = request
            .max_bytes_billed
            .unwrap_or(self.default_max_bytes_billed);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        info!(
            dry_run = request.dry_run,
            max_bytes_billed = ceiling,
            "Dispatching query to warehouse engine"
        );

        let outcome = tokio::time::timeout(
            timeout,
            self.engine.run(sql, request.dry_run, Some(ceiling), timeout),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => QueryExecutionResult::failure(
                FailureKind::Timeout,
                &format!("Query timed out after {}s", timeout.as_secs()),
                None,
                elapsed_ms,
            ),
            Ok(Err(e)) => {
                let detail = e.to_string();
                warn!("Warehouse engine failure: {}", detail);
                let (kind, message) = if is_billing_limit(&detail) {
                    (
                        FailureKind::BillingLimit,
                        "Query exceeds the byte-billing ceiling",
                    )
                } else {
                    (FailureKind::EngineError, "Warehouse query failed")
                };
                QueryExecutionResult::failure(kind, message, Some(detail), elapsed_ms)
            }
            Ok(Ok(run)) => QueryExecutionResult {
                success: true,
                // A dry run only estimates; row data is never surfaced.
                rows: if request.dry_run { Vec::new() } else { run.rows },
                total_rows: if request.dry_run { 0 } else { run.total_rows },
                bytes_processed: run.bytes_processed,
                cache_hit: run.cache_hit,
                execution_time_ms: elapsed_ms,
                error: None,
            },
        }
    }
}

fn is_billing_limit(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("bytesbilled")
        || lower.contains("bytes billed")
        || lower.contains("billing")
        || (lower.contains("bytes") && lower.contains("limit"))
}
