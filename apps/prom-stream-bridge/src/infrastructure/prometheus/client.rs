//! Prometheus Query Client
//!
//! HTTP adapter implementing [`MetricsBackend`] against the Prometheus
//! HTTP API.
//!
//! # Endpoints
//!
//! - `GET {base}/api/v1/query_range` with `query`, ISO-8601 `start`
//!   and `end`, and a `step` like `5s`
//! - `GET {base}/api/v1/query` with `query`
//!
//! Both return the standard envelope:
//!
//! ```json
//! {
//!   "status": "success",
//!   "data": {
//!     "result": [
//!       {
//!         "metric": {"namespace": "default", "pod": "api-6f9c"},
//!         "values": [[1700000100, "0.25"], [1700000105, "0.27"]]
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! Instant queries carry a single `value` pair per row instead of
//! `values`. Responses are validated strictly: a missing envelope
//! field fails the whole batch, so a cycle never emits a partial read.
//!
//! Requests carry no timeout. A slow backend stalls only the cycles
//! that are waiting on it, and retrying is left entirely to the
//! schedule cadence.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::application::ports::{BackendError, MetricsBackend};
use crate::domain::point::{Sample, SeriesRow};
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::metrics::{QueryKind, record_backend_failure, record_query_duration};
use crate::infrastructure::prometheus::signer::RequestSigner;

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the Prometheus-compatible query API.
#[derive(Debug)]
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
    signer: RequestSigner,
}

impl PrometheusClient {
    /// Create a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| BackendError::Request {
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: config.backend.endpoint.clone(),
            signer: RequestSigner::from_config(config),
        })
    }

    /// Send a signed GET and decode the response envelope.
    async fn get(&self, url: Url) -> Result<QueryResponse, BackendError> {
        let headers = self
            .signer
            .sign_get(&url)
            .map_err(|err| BackendError::Signing {
                message: err.to_string(),
            })?;

        let response = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|err| BackendError::Request {
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Request {
                message: format!("HTTP {status}: {body}"),
            });
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|err| BackendError::MalformedResponse {
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_secs: u64,
    ) -> Result<Vec<SeriesRow>, BackendError> {
        let url = range_url(&self.base_url, query, start, end, step_secs)?;
        let started = Instant::now();
        let outcome = self.get(url).await.and_then(rows_from_matrix);
        record_query_duration(QueryKind::Range, started.elapsed());
        if outcome.is_err() {
            record_backend_failure(QueryKind::Range);
        }
        outcome
    }

    async fn query_instant(&self, query: &str) -> Result<Vec<SeriesRow>, BackendError> {
        let url = instant_url(&self.base_url, query)?;
        let started = Instant::now();
        let outcome = self.get(url).await.and_then(rows_from_vector);
        record_query_duration(QueryKind::Instant, started.elapsed());
        if outcome.is_err() {
            record_backend_failure(QueryKind::Instant);
        }
        outcome
    }
}

// =============================================================================
// URLs
// =============================================================================

fn range_url(
    base: &str,
    query: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_secs: u64,
) -> Result<Url, BackendError> {
    Url::parse_with_params(
        &format!("{base}/api/v1/query_range"),
        [
            ("query", query),
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true).as_str()),
            ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true).as_str()),
            ("step", format!("{step_secs}s").as_str()),
        ],
    )
    .map_err(|err| BackendError::Request {
        message: err.to_string(),
    })
}

fn instant_url(base: &str, query: &str) -> Result<Url, BackendError> {
    Url::parse_with_params(&format!("{base}/api/v1/query"), [("query", query)]).map_err(|err| {
        BackendError::Request {
            message: err.to_string(),
        }
    })
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Prometheus query response structure.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: Option<QueryData>,
    error: Option<String>,
}

/// Prometheus response data.
#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<ResultRow>,
}

/// Individual result row.
#[derive(Debug, Deserialize)]
struct ResultRow {
    metric: HashMap<String, String>,
    values: Option<Vec<(f64, String)>>,
    value: Option<(f64, String)>,
}

fn success_data(response: QueryResponse) -> Result<QueryData, BackendError> {
    if response.status != "success" {
        return Err(BackendError::Request {
            message: response
                .error
                .unwrap_or_else(|| format!("backend status {}", response.status)),
        });
    }

    response.data.ok_or_else(|| BackendError::MalformedResponse {
        message: "missing data field".to_string(),
    })
}

/// Convert a range (matrix) response, preserving row and sample order.
fn rows_from_matrix(response: QueryResponse) -> Result<Vec<SeriesRow>, BackendError> {
    success_data(response)?
        .result
        .into_iter()
        .map(|row| {
            let values = row.values.ok_or_else(|| BackendError::MalformedResponse {
                message: "result row missing values".to_string(),
            })?;
            Ok(SeriesRow {
                labels: row.metric,
                samples: values
                    .into_iter()
                    .map(|(timestamp, value)| Sample { timestamp, value })
                    .collect(),
            })
        })
        .collect()
}

/// Convert an instant (vector) response: one sample per row.
fn rows_from_vector(response: QueryResponse) -> Result<Vec<SeriesRow>, BackendError> {
    success_data(response)?
        .result
        .into_iter()
        .map(|row| {
            let (timestamp, value) = row.value.ok_or_else(|| BackendError::MalformedResponse {
                message: "result row missing value".to_string(),
            })?;
            Ok(SeriesRow {
                labels: row.metric,
                samples: vec![Sample { timestamp, value }],
            })
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn response(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn range_url_uses_iso_timestamps() {
        let url = range_url("http://localhost:9009", "up", ts(100), ts(160), 5).unwrap();
        assert_eq!(url.path(), "/api/v1/query_range");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("query".to_string(), "up".to_string())));
        assert!(pairs.contains(&("start".to_string(), "1970-01-01T00:01:40Z".to_string())));
        assert!(pairs.contains(&("end".to_string(), "1970-01-01T00:02:40Z".to_string())));
        assert!(pairs.contains(&("step".to_string(), "5s".to_string())));
    }

    #[test]
    fn instant_url_carries_only_the_query() {
        let url = instant_url("http://localhost:9009", "rate(x[1m])").unwrap();
        assert_eq!(url.path(), "/api/v1/query");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("query".to_string(), "rate(x[1m])".to_string())]);
    }

    #[test]
    fn matrix_rows_preserve_order_and_values() {
        let rows = rows_from_matrix(response(json!({
            "status": "success",
            "data": {
                "result": [
                    {
                        "metric": {"namespace": "default", "pod": "api-1"},
                        "values": [[100.0, "1"], [105.0, "+Inf"]]
                    },
                    {
                        "metric": {"namespace": "default", "pod": "api-2"},
                        "values": [[100.0, "3"]]
                    }
                ]
            }
        })))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].labels["pod"], "api-1");
        assert_eq!(rows[0].samples.len(), 2);
        assert_eq!(rows[0].samples[0].timestamp, 100.0);
        assert_eq!(rows[0].samples[0].value, "1");
        assert_eq!(rows[0].samples[1].value, "+Inf");
        assert_eq!(rows[1].labels["pod"], "api-2");
        assert_eq!(rows[1].samples.len(), 1);
    }

    #[test]
    fn vector_rows_carry_one_sample_each() {
        let rows = rows_from_vector(response(json!({
            "status": "success",
            "data": {
                "result": [
                    {"metric": {"pod": "api-1"}, "value": [115.0, "0.5"]}
                ]
            }
        })))
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].samples.len(), 1);
        assert_eq!(rows[0].samples[0].timestamp, 115.0);
        assert_eq!(rows[0].samples[0].value, "0.5");
    }

    #[test]
    fn empty_result_yields_no_rows() {
        let rows = rows_from_vector(response(json!({
            "status": "success",
            "data": {"result": []}
        })))
        .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn error_status_fails_the_batch() {
        let err = rows_from_matrix(response(json!({
            "status": "error",
            "error": "query timed out"
        })))
        .unwrap_err();
        assert!(matches!(err, BackendError::Request { .. }));
        assert!(err.to_string().contains("query timed out"));
    }

    #[test]
    fn missing_data_field_is_malformed() {
        let err = rows_from_matrix(response(json!({"status": "success"}))).unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
    }

    #[test]
    fn matrix_row_without_values_fails_the_batch() {
        let err = rows_from_matrix(response(json!({
            "status": "success",
            "data": {
                "result": [
                    {"metric": {}, "values": [[100.0, "1"]]},
                    {"metric": {}, "value": [100.0, "1"]}
                ]
            }
        })))
        .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
    }

    #[test]
    fn vector_row_without_value_fails_the_batch() {
        let err = rows_from_vector(response(json!({
            "status": "success",
            "data": {
                "result": [
                    {"metric": {}, "values": [[100.0, "1"]]}
                ]
            }
        })))
        .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
    }
}
