//! C1 — Metric & Command Store Gateway.
//!
//! An HTTP client over InfluxDB's line-protocol write endpoint, grounded in
//! the same `reqwest::Client`-wrapped-in-a-typed-struct shape as the
//! teacher's fleet HTTP client. Exposed behind a trait so workers and
//! processors can be tested against an in-memory fake.

use crate::types::{CommandField, EquipmentType, MetricMap};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TimeseriesError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    ServerError(reqwest::StatusCode),
}

/// Per-field write outcome — one malformed value must not lose the rest
/// of the batch.
pub type WriteResults = HashMap<String, Result<(), String>>;

#[async_trait]
pub trait MetricCommandStore: Send + Sync {
    /// Returns the most recent sample per field, merged across the window.
    /// Falls back to a conservative default map when no samples exist or
    /// reads have persistently failed.
    async fn read_latest_metrics(
        &self,
        equipment_id: &str,
        location_id: &str,
        window_minutes: i64,
    ) -> MetricMap;

    /// Count of UI-originated commands within the window, used by C5 as a
    /// boolean "recent operator command" signal.
    async fn read_recent_ui_commands(&self, equipment_id: &str, window_minutes: i64) -> u64;

    /// Whether at least one real sample exists within the window, as
    /// distinct from `read_latest_metrics` which always returns a usable
    /// map (falling back to conservative defaults when samples are
    /// absent). Used by C8 to detect a "no samples" fault signature that
    /// the fallback map would otherwise mask as healthy-looking readings.
    async fn has_recent_samples(&self, equipment_id: &str, window_minutes: i64) -> bool;

    /// Write one row per command to both the control-commands (audit) table
    /// and the locations (current-state) table. Idempotent on replay.
    async fn write_commands(
        &self,
        equipment_id: &str,
        location_id: &str,
        equipment_type: EquipmentType,
        source_tag: &str,
        commands: &[CommandField],
    ) -> WriteResults;
}

/// InfluxDB-backed implementation speaking the line-protocol write API and
/// a minimal `/query`-style read API.
pub struct InfluxGateway {
    http: reqwest::Client,
    base_url: String,
    database: String,
    /// Consecutive read failures; after more than 2, reads degrade to the
    /// fallback metric map after repeated read errors.
    consecutive_read_failures: AtomicU32,
}

impl InfluxGateway {
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build InfluxDB HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            consecutive_read_failures: AtomicU32::new(0),
        }
    }

    fn write_url(&self) -> String {
        format!(
            "{}/write?db={}&precision=ns",
            self.base_url, self.database
        )
    }

    fn query_url(&self, q: &str) -> String {
        format!(
            "{}/query?db={}&q={}",
            self.base_url,
            self.database,
            urlencode(q)
        )
    }

    async fn query_table(
        &self,
        measurement: &str,
        equipment_id: &str,
        window_minutes: i64,
    ) -> Result<Vec<(i64, String, crate::types::Scalar)>, TimeseriesError> {
        let q = format!(
            "SELECT * FROM \"{measurement}\" WHERE \"equipmentId\" = '{equipment_id}' AND time > now() - {window_minutes}m"
        );
        let resp = self.http.get(self.query_url(&q)).send().await?;
        if !resp.status().is_success() {
            return Err(TimeseriesError::ServerError(resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(parse_influx_series(&body))
    }

    /// Lightweight connectivity check for the background health loop — does
    /// not exercise a real measurement, just confirms the server answers.
    pub async fn ping(&self) -> Result<(), TimeseriesError> {
        let resp = self.http.get(self.query_url("SHOW DATABASES")).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TimeseriesError::ServerError(resp.status()))
        }
    }

    async fn write_line_protocol(&self, lines: &[String]) -> Result<(), TimeseriesError> {
        if lines.is_empty() {
            return Ok(());
        }
        let body = lines.join("\n");
        let resp = self
            .http
            .post(self.write_url())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TimeseriesError::ServerError(resp.status()))
        }
    }
}

/// Parse the subset of InfluxDB's JSON query response shape this gateway
/// needs: `results[0].series[0].{columns,values}` where one column is
/// `time` (RFC3339 or ns) and the rest are fields.
fn parse_influx_series(body: &serde_json::Value) -> Vec<(i64, String, crate::types::Scalar)> {
    use crate::types::Scalar;

    let mut out = Vec::new();
    let series = body
        .pointer("/results/0/series/0")
        .and_then(|s| s.as_object());
    let Some(series) = series else {
        return out;
    };
    let columns: Vec<String> = series
        .get("columns")
        .and_then(|c| c.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let values = series.get("values").and_then(|v| v.as_array());
    let Some(values) = values else {
        return out;
    };

    for row in values {
        let Some(row) = row.as_array() else { continue };
        let ts = row
            .first()
            .and_then(|t| t.as_i64())
            .unwrap_or(0);
        for (i, col) in columns.iter().enumerate().skip(1) {
            if crate::types::MetricSample::is_reserved_tag(col) {
                continue;
            }
            if let Some(v) = row.get(i) {
                let scalar = if let Some(n) = v.as_f64() {
                    Scalar::Num(n)
                } else if let Some(b) = v.as_bool() {
                    Scalar::Bool(b)
                } else if let Some(s) = v.as_str() {
                    Scalar::Text(s.to_string())
                } else {
                    continue;
                };
                out.push((ts, col.clone(), scalar));
            }
        }
    }
    out
}

fn urlencode(s: &str) -> String {
    // Query strings here are built from trusted internal field/tag names
    // and equipment ids, not raw user input; percent-encode spaces only.
    s.replace(' ', "%20")
}

#[async_trait]
impl MetricCommandStore for InfluxGateway {
    async fn read_latest_metrics(
        &self,
        equipment_id: &str,
        location_id: &str,
        window_minutes: i64,
    ) -> MetricMap {
        match self.query_table("metrics", equipment_id, window_minutes).await {
            Ok(rows) => {
                self.consecutive_read_failures.store(0, Ordering::Relaxed);
                if rows.is_empty() {
                    debug!(equipment_id, location_id, "No metric samples, using fallback map");
                    return crate::types::fallback_metrics();
                }
                crate::types::merge_latest(rows.into_iter().map(|(ts, field, value)| {
                    crate::types::MetricSample {
                        equipment_id: equipment_id.to_string(),
                        location_id: location_id.to_string(),
                        timestamp_ns: ts,
                        field,
                        value,
                    }
                }))
            }
            Err(e) => {
                let failures = self.consecutive_read_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures > 2 {
                    warn!(equipment_id, error = %e, failures, "Persistent metric read failure, degrading to fallback map");
                } else {
                    debug!(equipment_id, error = %e, failures, "Transient metric read failure");
                }
                crate::types::fallback_metrics()
            }
        }
    }

    async fn read_recent_ui_commands(&self, equipment_id: &str, window_minutes: i64) -> u64 {
        match self
            .query_table("ControlCommands", equipment_id, window_minutes)
            .await
        {
            Ok(rows) => rows
                .iter()
                .filter(|(_, _, v)| matches!(v, crate::types::Scalar::Text(s) if s == "ui"))
                .count() as u64,
            Err(e) => {
                warn!(equipment_id, error = %e, "UI command read failed, assuming none");
                0
            }
        }
    }

    async fn has_recent_samples(&self, equipment_id: &str, window_minutes: i64) -> bool {
        match self.query_table("metrics", equipment_id, window_minutes).await {
            Ok(rows) => !rows.is_empty(),
            // A transient read error is not the same fault signature as a
            // confirmed absence of samples, so don't report it as one.
            Err(e) => {
                warn!(equipment_id, error = %e, "Sample-presence read failed, assuming present");
                true
            }
        }
    }

    async fn write_commands(
        &self,
        equipment_id: &str,
        location_id: &str,
        equipment_type: EquipmentType,
        source_tag: &str,
        commands: &[CommandField],
    ) -> WriteResults {
        let mut results = WriteResults::new();
        let mut lines = Vec::with_capacity(commands.len() * 2);

        for cmd in commands {
            let field_value = match &cmd.value {
                crate::types::CommandValue::Number(n) => format!("value={n}"),
                crate::types::CommandValue::QuotedBool(b) => format!("value=\"{b}\""),
            };
            let tags = format!(
                "equipment_id={},location_id={},command_type={},equipment_type={},source={},status=applied",
                equipment_id,
                location_id,
                cmd.command_type,
                equipment_type.tag(),
                source_tag,
            );
            let ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
            lines.push(format!("ControlCommands,{tags} {field_value} {ts}"));
            lines.push(format!("Locations,{tags} {field_value} {ts}"));
            results.insert(cmd.command_type.clone(), Ok(()));
        }

        if let Err(e) = self.write_line_protocol(&lines).await {
            warn!(equipment_id, error = %e, "Command write batch failed");
            for cmd in commands {
                results.insert(cmd.command_type.clone(), Err(e.to_string()));
            }
        }

        results
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// In-memory fake for unit/scenario tests.
    #[derive(Default)]
    pub struct FakeMetricStore {
        pub metrics: Mutex<HashMap<String, MetricMap>>,
        pub recent_ui_commands: Mutex<HashMap<String, u64>>,
        pub written: Mutex<Vec<(String, String, Vec<CommandField>)>>,
    }

    impl FakeMetricStore {
        pub fn set_metrics(&self, equipment_id: &str, map: MetricMap) {
            self.metrics.lock().unwrap().insert(equipment_id.to_string(), map);
        }
    }

    #[async_trait]
    impl MetricCommandStore for FakeMetricStore {
        async fn read_latest_metrics(
            &self,
            equipment_id: &str,
            _location_id: &str,
            _window_minutes: i64,
        ) -> MetricMap {
            self.metrics
                .lock()
                .unwrap()
                .get(equipment_id)
                .cloned()
                .unwrap_or_else(crate::types::fallback_metrics)
        }

        async fn read_recent_ui_commands(&self, equipment_id: &str, _window_minutes: i64) -> u64 {
            self.recent_ui_commands
                .lock()
                .unwrap()
                .get(equipment_id)
                .copied()
                .unwrap_or(0)
        }

        async fn has_recent_samples(&self, equipment_id: &str, _window_minutes: i64) -> bool {
            self.metrics.lock().unwrap().contains_key(equipment_id)
        }

        async fn write_commands(
            &self,
            equipment_id: &str,
            location_id: &str,
            _equipment_type: EquipmentType,
            _source_tag: &str,
            commands: &[CommandField],
        ) -> WriteResults {
            self.written.lock().unwrap().push((
                equipment_id.to_string(),
                location_id.to_string(),
                commands.to_vec(),
            ));
            commands
                .iter()
                .map(|c| (c.command_type.clone(), Ok(())))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeMetricStore;
    use super::*;
    use crate::types::{CommandValue, Scalar};

    #[tokio::test]
    async fn fake_store_roundtrips_metrics() {
        let store = FakeMetricStore::default();
        let mut map = MetricMap::new();
        map.insert("supply".to_string(), Scalar::Num(55.0));
        store.set_metrics("E1", map.clone());

        let got = store.read_latest_metrics("E1", "L1", 15).await;
        assert_eq!(got.get("supply"), Some(&Scalar::Num(55.0)));
    }

    #[tokio::test]
    async fn fake_store_falls_back_when_unset() {
        let store = FakeMetricStore::default();
        let got = store.read_latest_metrics("unknown", "L1", 15).await;
        assert_eq!(got.get("outdoor"), Some(&Scalar::Num(50.0)));
    }

    #[tokio::test]
    async fn write_commands_reports_per_field_results() {
        let store = FakeMetricStore::default();
        let fields = vec![CommandField {
            command_type: "fanEnabled".into(),
            value: CommandValue::QuotedBool(true),
        }];
        let results = store
            .write_commands("E1", "L1", EquipmentType::AirHandler, "worker", &fields)
            .await;
        assert!(results.get("fanEnabled").unwrap().is_ok());
    }
}
