use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Weight given to the newest sample in the rolling response-time average.
const EWMA_WEIGHT: f64 = 0.1;

/// Rolling request metrics for the catalog client.
///
/// `average_response_time_ms` is an exponentially-weighted moving average;
/// both successful and failed operations feed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetrics {
    #[serde(rename = "requestCount")]
    pub request_count: u64,
    #[serde(rename = "errorCount")]
    pub error_count: u64,
    /// Unix epoch milliseconds of the most recent request, if any.
    #[serde(rename = "lastRequestTime")]
    pub last_request_time: Option<i64>,
    #[serde(rename = "averageResponseTime")]
    pub average_response_time_ms: f64,
}

impl CatalogMetrics {
    pub fn new() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            last_request_time: None,
            average_response_time_ms: 0.0,
        }
    }

    /// Records one completed operation.
    pub fn record(&mut self, elapsed: Duration, success: bool) {
        self.request_count += 1;
        if !success {
            self.error_count += 1;
        }
        self.last_request_time = Some(now_millis());

        let sample = elapsed.as_secs_f64() * 1_000.0;
        self.average_response_time_ms = if self.request_count == 1 {
            sample
        } else {
            EWMA_WEIGHT * sample + (1.0 - EWMA_WEIGHT) * self.average_response_time_ms
        };
    }
}

impl Default for CatalogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut metrics = CatalogMetrics::new();
        metrics.record(Duration::from_millis(100), true);

        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.error_count, 0);
        assert!(metrics.last_request_time.is_some());
        assert!((metrics.average_response_time_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_weighting() {
        let mut metrics = CatalogMetrics::new();
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(200), true);

        // 0.1 * 200 + 0.9 * 100
        assert!((metrics.average_response_time_ms - 110.0).abs() < 1e-9);

        metrics.record(Duration::from_millis(50), true);
        // 0.1 * 50 + 0.9 * 110
        assert!((metrics.average_response_time_ms - 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_count_and_feed_average() {
        let mut metrics = CatalogMetrics::new();
        metrics.record(Duration::from_millis(100), false);
        metrics.record(Duration::from_millis(300), true);

        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);
        assert!((metrics.average_response_time_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let metrics = CatalogMetrics::new();
        let json = serde_json::to_value(&metrics).expect("serialization failed");

        assert!(json.get("requestCount").is_some());
        assert!(json.get("errorCount").is_some());
        assert!(json.get("lastRequestTime").is_some());
        assert!(json.get("averageResponseTime").is_some());
    }
}
