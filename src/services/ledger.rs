use crate::{
    error::{Result, X402Error},
    models::{LedgerSummary, PaymentProof, PaymentRecord, TokenUsage, WindowSummary},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_LEDGER_CAPACITY: usize = 1000;

/// Minimum fractional digits shown for USD totals.
const USD_SCALE: u32 = 4;

/// A payment about to be recorded.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub proof: PaymentProof,
    pub model: String,
    pub usage: TokenUsage,
}

/// Capacity-bounded JSON file of completed payments, oldest first on disk.
///
/// Every write rewrites the whole file without locking. Only one process may write at a
/// time; two concurrent writers lose updates.
#[derive(Debug, Clone)]
pub struct PaymentLedger {
    path: PathBuf,
    capacity: usize,
}

impl PaymentLedger {
    /// A `capacity` of zero is raised to one; the ledger always keeps the latest payment.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All stored records, oldest first. A missing or empty file is an empty ledger.
    pub async fn load(&self) -> Result<Vec<PaymentRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    async fn persist(&self, records: &[PaymentRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Appends a payment. The amount must be a non-negative decimal string.
    pub async fn record(&self, entry: NewPayment) -> Result<PaymentRecord> {
        parse_amount(&entry.proof.amount)?;

        let mut records = self.load().await?;

        let existing: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut id = Uuid::new_v4().to_string();
        while existing.contains(id.as_str()) {
            id = Uuid::new_v4().to_string();
        }

        let record = PaymentRecord::from_proof(id, entry.proof, entry.model, entry.usage);
        records.push(record.clone());

        if records.len() > self.capacity {
            let overflow = records.len() - self.capacity;
            records.drain(..overflow);
            tracing::debug!("Ledger full, dropped {} oldest record(s)", overflow);
        }

        self.persist(&records).await?;

        tracing::info!(
            "Recorded payment {} of ${} for {} ({} stored)",
            record.transaction_hash,
            record.amount,
            record.model,
            records.len()
        );

        Ok(record)
    }

    /// Up to `limit` records, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<PaymentRecord>> {
        let records = self.load().await?;
        Ok(records.into_iter().rev().take(limit).collect())
    }

    pub async fn total_spent(&self) -> Result<String> {
        let records = self.load().await?;
        Ok(format_usd(sum_amounts(records.iter())))
    }

    pub async fn summary(&self) -> Result<LedgerSummary> {
        self.summary_at(Utc::now()).await
    }

    /// Summary with the 24h window ending (exclusive) at `now`.
    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<LedgerSummary> {
        let records = self.load().await?;
        Ok(summarize(&records, now))
    }
}

fn summarize(records: &[PaymentRecord], now: DateTime<Utc>) -> LedgerSummary {
    let window_start = now - Duration::hours(24);
    let recent: Vec<&PaymentRecord> = records
        .iter()
        .filter(|r| r.timestamp >= window_start && r.timestamp < now)
        .collect();

    LedgerSummary {
        total_spent: format_usd(sum_amounts(records.iter())),
        total_payments: records.len(),
        last_24h: WindowSummary {
            count: recent.len(),
            amount: format_usd(sum_amounts(recent.into_iter())),
        },
        top_model: top_model(records),
    }
}

fn parse_amount(amount: &str) -> Result<Decimal> {
    let parsed = Decimal::from_str(amount.trim())
        .map_err(|e| X402Error::InvalidAmount(format!("{:?}: {}", amount, e)))?;
    if parsed.is_sign_negative() {
        return Err(X402Error::InvalidAmount(format!("{:?} is negative", amount)));
    }
    Ok(parsed)
}

fn sum_amounts<'a>(records: impl Iterator<Item = &'a PaymentRecord>) -> Decimal {
    records.fold(Decimal::ZERO, |total, record| {
        let amount = match parse_amount(&record.amount) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!("Skipping record {}: {}", record.id, e);
                return total;
            }
        };
        match total.checked_add(amount) {
            Some(sum) => sum,
            None => {
                tracing::warn!("Skipping record {}: total overflows at {}", record.id, record.amount);
                total
            }
        }
    })
}

fn format_usd(mut total: Decimal) -> String {
    if total.scale() < USD_SCALE {
        total.rescale(USD_SCALE);
    }
    total.to_string()
}

/// Most frequent model; ties go to whichever appeared first, scanning oldest to newest.
fn top_model(records: &[PaymentRecord]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for record in records {
        match counts.iter_mut().find(|(model, _)| *model == record.model) {
            Some((_, count)) => *count += 1,
            None => counts.push((record.model.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (model, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((model, count));
        }
    }
    best.map(|(model, _)| model.to_string())
}
