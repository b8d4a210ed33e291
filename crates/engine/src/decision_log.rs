//! Append-only CSV sink for decisions.
//!
//! Rows flow through an mpsc channel into one writer task, so concurrent
//! callers can never interleave a row. The header is written once when the
//! file is new or empty. Arrays are semicolon-joined; quoting is standard
//! CSV (fields containing `"`, `,` or newlines are double-quoted with inner
//! quotes doubled).

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use spot_bot_core::types::{Decision, EntryType};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tokio::sync::mpsc;

const HEADER: [&str; 17] = [
    "timestamp",
    "pair",
    "action",
    "size_pct",
    "entry_type",
    "entry_offset_bps",
    "stop_atr",
    "tp_atr",
    "followups",
    "comment",
    "price",
    "confluence_score",
    "volatility_regime",
    "trend_regime",
    "momentum_regime",
    "reasons",
    "dry_run",
];

/// One decision-log row.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub ts_ms: i64,
    pub pair: String,
    pub decision: Decision,
    pub price: Option<f64>,
    pub confluence_score: i32,
    pub volatility_regime: String,
    pub trend_regime: String,
    pub momentum_regime: String,
    pub reasons: Vec<String>,
    pub dry_run: bool,
}

/// Handle to the decision log writer task.
#[derive(Clone)]
pub struct DecisionLog {
    tx: mpsc::UnboundedSender<DecisionRecord>,
}

impl DecisionLog {
    /// Opens (or creates) the CSV at `path` and spawns the writer task.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or the header cannot be written.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_empty = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open decision log: {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DecisionRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = write_record(&mut writer, &record) {
                    tracing::error!(error = %e, "decision log write failed");
                }
            }
        });
        Ok(Self { tx })
    }

    /// Queues one row. Never blocks; a closed writer only logs.
    pub fn append(&self, record: DecisionRecord) {
        if self.tx.send(record).is_err() {
            tracing::error!("decision log writer is gone, dropping record");
        }
    }
}

fn write_record(writer: &mut csv::Writer<File>, record: &DecisionRecord) -> csv::Result<()> {
    let timestamp = Utc
        .timestamp_millis_opt(record.ts_ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| record.ts_ms.to_string());
    let decision = &record.decision;
    let entry_type = decision.entry.map(|e| match e.entry_type {
        EntryType::Market => "market",
        EntryType::Limit => "limit",
    });
    let entry_offset = decision.entry.and_then(|e| e.offset_bps);

    writer.write_record(&[
        timestamp,
        record.pair.clone(),
        decision.action.as_str().to_string(),
        opt_to_string(decision.size_pct),
        entry_type.unwrap_or_default().to_string(),
        opt_to_string(entry_offset),
        opt_to_string(decision.stop_atr),
        opt_to_string(decision.tp_atr),
        decision.followups.join(";"),
        decision.comment.clone(),
        opt_to_string(record.price),
        record.confluence_score.to_string(),
        record.volatility_regime.clone(),
        record.trend_regime.clone(),
        record.momentum_regime.clone(),
        record.reasons.join(";"),
        record.dry_run.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

fn opt_to_string(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
