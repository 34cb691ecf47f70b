//! Growth ledger — append-only rows, one per scheduled action execution.

use clawdvc_core::error::StorageError;
use clawdvc_core::metrics::{ActionKind, GrowthMetric, Outcome};
use clawdvc_core::storage::{Storage, collections};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

const LEDGER_KEY: &str = "ledger";

/// Aggregates over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub counters: BTreeMap<String, u64>,
    pub last_run: BTreeMap<String, chrono::DateTime<chrono::Utc>>,
}

pub struct GrowthLedger {
    storage: Arc<dyn Storage>,
}

impl GrowthLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Append one row. Returns the ledger length after the write.
    pub async fn record(&self, metric: &GrowthMetric) -> Result<u64, StorageError> {
        let value = serde_json::to_value(metric).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage
            .append(collections::GROWTH_METRICS, LEDGER_KEY, value)
            .await
    }

    /// Every row, oldest first. Rows that no longer parse are skipped.
    pub async fn all(&self) -> Result<Vec<GrowthMetric>, StorageError> {
        let Some(value) = self.storage.get(collections::GROWTH_METRICS, LEDGER_KEY).await? else {
            return Ok(Vec::new());
        };
        let serde_json::Value::Array(rows) = value else {
            return Err(StorageError::Corrupt {
                key: format!("{}/{LEDGER_KEY}", collections::GROWTH_METRICS),
                reason: "ledger is not a list".into(),
            });
        };
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(metric) => Some(metric),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable ledger row");
                    None
                }
            })
            .collect())
    }

    pub async fn for_kind(&self, kind: ActionKind) -> Result<Vec<GrowthMetric>, StorageError> {
        Ok(self.all().await?.into_iter().filter(|m| m.kind == kind).collect())
    }

    pub async fn totals(&self) -> Result<LedgerTotals, StorageError> {
        let mut totals = LedgerTotals::default();
        for metric in self.all().await? {
            totals.runs += 1;
            match metric.outcome {
                Outcome::Success => totals.successes += 1,
                Outcome::Failure => totals.failures += 1,
                Outcome::Skipped => totals.skipped += 1,
            }
            for (name, n) in &metric.counters {
                *totals.counters.entry(name.clone()).or_default() += n;
            }
            totals.last_run.insert(metric.kind.as_str().to_string(), metric.timestamp);
        }
        Ok(totals)
    }
}
