use crate::models::PaymentProof;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts charged for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A completed payment as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub transaction_hash: String,
    pub amount: String,
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(flatten)]
    pub usage: TokenUsage,
}

impl PaymentRecord {
    pub fn from_proof(id: String, proof: PaymentProof, model: String, usage: TokenUsage) -> Self {
        Self {
            id,
            transaction_hash: proof.transaction_hash,
            amount: proof.amount,
            network: proof.network,
            timestamp: proof.timestamp,
            model,
            usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub count: usize,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total_spent: String,
    pub total_payments: usize,
    #[serde(rename = "last24h")]
    pub last_24h: WindowSummary,
    pub top_model: Option<String>,
}
