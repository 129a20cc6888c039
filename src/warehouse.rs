//! Warehouse query engine
//!
//! The Execution Gateway talks to the warehouse through the
//! `WarehouseEngine` trait; `BigQueryEngine` is the REST implementation
//! over `jobs.query`. Engines report raw row data and execution statistics
//! and surface engine-side failures as crate errors for the gateway to
//! categorize.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// One decoded result row: column name -> value.
pub type Row = Map<String, Value>;

/// Raw outcome of one engine run. On a dry run `rows` is empty and
/// `bytes_processed` is the cost estimate.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    pub rows: Vec<Row>,
    pub total_rows: u64,
    pub bytes_processed: u64,
    pub cache_hit: bool,
}

/// Opaque warehouse collaborator.
#[async_trait]
pub trait WarehouseEngine: Send + Sync {
    async fn run(
        &self,
        sql: &str,
        dry_run: bool,
        max_bytes_billed: Option<u64>,
        timeout: Duration,
    ) -> Result<EngineRun>;
}

const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// BigQuery `jobs.query` client.
#[derive(Clone)]
pub struct BigQueryEngine {
    project: String,
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl BigQueryEngine {
    pub fn new(project: String, access_token: String) -> Self {
        Self {
            project,
            access_token,
            base_url: BIGQUERY_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different endpoint (emulators, test servers).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl WarehouseEngine for BigQueryEngine {
    async fn run(
        &self,
        sql: &str,
        dry_run: bool,
        max_bytes_billed: Option<u64>,
        timeout: Duration,
    ) -> Result<EngineRun> {
        let mut body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "dryRun": dry_run,
            "useQueryCache": true,
            "timeoutMs": timeout.as_millis() as u64,
        });
        if let Some(ceiling) = max_bytes_billed {
            // BigQuery takes the ceiling as a decimal string.
            body["maximumBytesBilled"] = Value::String(ceiling.to_string());
        }

        let response = self
            .client
            .post(format!(
                "{}/projects/{}/queries",
                self.base_url, self.project
            ))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Execution(format!("Warehouse request failed: {}", e)))?;

        let response_json: Value = response.json().await.map_err(|e| {
            AssistantError::Execution(format!("Failed to parse warehouse response: {}", e))
        })?;

        if let Some(error) = response_json.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown engine error");
            return Err(AssistantError::Execution(message.to_string()));
        }

        Ok(decode_query_response(&response_json))
    }
}

/// Decode a `jobs.query` response into rows and statistics. BigQuery ships
/// row values as an `f`/`v` structure positioned against `schema.fields`.
fn decode_query_response(response: &Value) -> EngineRun {
    let field_names: Vec<String> = response["schema"]["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Row> = response["rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let mut decoded = Row::new();
                    if let Some(cells) = row["f"].as_array() {
                        for (name, cell) in field_names.iter().zip(cells) {
                            decoded.insert(name.clone(), cell["v"].clone());
                        }
                    }
                    decoded
                })
                .collect()
        })
        .unwrap_or_default();

    EngineRun {
        total_rows: parse_u64(&response["totalRows"]).unwrap_or(rows.len() as u64),
        bytes_processed: parse_u64(&response["totalBytesProcessed"]).unwrap_or(0),
        cache_hit: response["cacheHit"].as_bool().unwrap_or(false),
        rows,
    }
}

/// BigQuery encodes 64-bit counters as strings.
fn parse_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse::<u64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rows_and_stats() {
        let response = serde_json::json!({
            "schema": {"fields": [{"name": "name"}, {"name": "price"}]},
            "rows": [
                {"f": [{"v": "widget"}, {"v": "9.50"}]},
                {"f": [{"v": "gadget"}, {"v": "12.00"}]}
            ],
            "totalRows": "2",
            "totalBytesProcessed": "1048576",
            "cacheHit": true
        });

        let run = decode_query_response(&response);
        assert_eq!(run.total_rows, 2);
        assert_eq!(run.bytes_processed, 1_048_576);
        assert!(run.cache_hit);
        assert_eq!(run.rows.len(), 2);
        assert_eq!(run.rows[0]["name"], Value::String("widget".to_string()));
        assert_eq!(run.rows[1]["price"], Value::String("12.00".to_string()));
    }

    #[test]
    fn test_decode_dry_run_response_has_no_rows() {
        let response = serde_json::json!({
            "totalBytesProcessed": "5242880",
            "jobComplete": true
        });

        let run = decode_query_response(&response);
        assert!(run.rows.is_empty());
        assert_eq!(run.bytes_processed, 5_242_880);
        assert_eq!(run.total_rows, 0);
    }
}
