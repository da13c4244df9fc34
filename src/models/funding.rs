use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// One chain's answer to a balance query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSample {
    pub chain: String,
    pub formatted: String,
    #[serde(with = "u256_dec")]
    pub raw: U256,
    pub has_funds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BalanceSample {
    pub fn failed(chain: &str, reason: impl Into<String>) -> Self {
        Self {
            chain: chain.to_string(),
            formatted: "0".to_string(),
            raw: U256::zero(),
            has_funds: false,
            error: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingResult {
    pub address: String,
    pub balances: BTreeMap<String, BalanceSample>,
    pub total_formatted: String,
    #[serde(with = "u256_dec")]
    pub total_raw: U256,
    pub has_funds: bool,
    pub checked_at: DateTime<Utc>,
}

impl FundingResult {
    /// True when any single chain that answered holds at least `minimum`.
    pub fn any_chain_meets(&self, minimum: U256) -> bool {
        self.balances
            .values()
            .any(|sample| sample.is_ok() && sample.raw >= minimum)
    }
}

/// A balance read that may not have succeeded.
///
/// Callers decide whether an unknown balance should count as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceReading {
    Verified(U256),
    Unknown { reason: String },
}

impl BalanceReading {
    pub fn or_zero(&self) -> U256 {
        match self {
            BalanceReading::Verified(value) => *value,
            BalanceReading::Unknown { .. } => U256::zero(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, BalanceReading::Verified(_))
    }
}

impl Serialize for BalanceReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            BalanceReading::Verified(raw) => {
                map.serialize_entry("status", "verified")?;
                map.serialize_entry("raw", &raw.to_string())?;
            }
            BalanceReading::Unknown { reason } => {
                map.serialize_entry("status", "unknown")?;
                map.serialize_entry("reason", reason)?;
            }
        }
        map.end()
    }
}

/// Serializes a `U256` as a base-10 string instead of ethers' default hex.
pub mod u256_dec {
    use ethers::types::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(|e| D::Error::custom(format!("invalid integer {}: {}", s, e)))
    }
}
