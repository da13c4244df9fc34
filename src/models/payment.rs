use crate::error::{Result, X402Error};
use base64::{engine::general_purpose::STANDARD as b64, Engine};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The only payment scheme this client can satisfy.
pub const EXACT_SCHEME: &str = "exact";

/// Length of the signed authorization window, in seconds.
pub const AUTHORIZATION_WINDOW_SECS: u64 = 60;

fn default_decimals() -> u8 {
    6
}

/// What the server asks to be paid, decoded from `X-PAYMENT-REQUIRED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    /// Amount in the token's smallest unit, as a decimal string.
    pub max_amount_required: String,
    pub resource: String,
    pub pay_to: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

impl PaymentRequirement {
    /// Converts `maxAmountRequired` into a USD amount using the token's decimals.
    ///
    /// Stablecoins are assumed to be pegged 1:1, so the token amount is the USD amount.
    pub fn amount_usd(&self) -> Result<Decimal> {
        let raw = self.max_amount_required.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(X402Error::InvalidPaymentHeader(format!(
                "maxAmountRequired is not an unsigned integer: {:?}",
                self.max_amount_required
            )));
        }

        let units: i128 = raw.parse().map_err(|_| {
            X402Error::InvalidPaymentHeader(format!("maxAmountRequired out of range: {}", raw))
        })?;

        Decimal::try_from_i128_with_scale(units, u32::from(self.decimals)).map_err(|e| {
            X402Error::InvalidPaymentHeader(format!(
                "cannot scale {} by {} decimals: {}",
                raw, self.decimals, e
            ))
        })
    }
}

/// Unsigned authorization. Its compact JSON form is the message that gets signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    #[serde(flatten)]
    pub requirement: PaymentRequirement,
    pub payer: String,
    pub valid_after: u64,
    pub valid_before: u64,
    /// `0x`-prefixed hex of 32 random bytes.
    pub nonce: String,
}

impl PaymentAuthorization {
    pub fn new(requirement: PaymentRequirement, payer: String, now: u64, nonce: [u8; 32]) -> Self {
        Self {
            requirement,
            payer,
            valid_after: now,
            valid_before: now + AUTHORIZATION_WINDOW_SECS,
            nonce: format!("0x{}", hex::encode(nonce)),
        }
    }

    /// Canonical serialization: compact JSON with fields in declaration order.
    pub fn canonical_message(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| X402Error::Signing(e.to_string()))
    }
}

/// Authorization plus the payer's signature over [`PaymentAuthorization::canonical_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPaymentAuthorization {
    #[serde(flatten)]
    pub authorization: PaymentAuthorization,
    pub signature: String,
}

impl SignedPaymentAuthorization {
    pub fn to_header(&self) -> Result<String> {
        encode_header(self).map_err(|e| X402Error::Signing(e.to_string()))
    }
}

/// Server's confirmation that a payment settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub transaction_hash: String,
    /// USD amount as a decimal string.
    pub amount: String,
    pub network: String,
    pub timestamp: DateTime<Utc>,
}

/// Raw `X-PAYMENT-RESPONSE` body. Servers disagree on field names, so this is lenient.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaymentResponseHeader {
    #[serde(alias = "txHash", alias = "transaction")]
    pub transaction_hash: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub timestamp: Option<HeaderTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HeaderTimestamp {
    Rfc3339(DateTime<Utc>),
    UnixSeconds(i64),
}

impl HeaderTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            HeaderTimestamp::Rfc3339(dt) => Some(*dt),
            HeaderTimestamp::UnixSeconds(secs) => Utc.timestamp_opt(*secs, 0).single(),
        }
    }
}

/// Outcome of the payment side of a negotiated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The server never asked for payment.
    Free,
    /// Payment was made and the server returned a decodable proof.
    Settled(PaymentProof),
    /// Payment was made but no usable proof came back.
    Unconfirmed { reason: String },
}

impl Settlement {
    pub fn proof(&self) -> Option<&PaymentProof> {
        match self {
            Settlement::Settled(proof) => Some(proof),
            _ => None,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Settlement::Free)
    }
}

/// Base64-encoded JSON, the format of every x402 header.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(b64.encode(json))
}

pub fn decode_header<T: DeserializeOwned>(encoded: &str) -> Result<T, String> {
    let bytes = b64
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(amount: &str, decimals: u8) -> PaymentRequirement {
        PaymentRequirement {
            scheme: EXACT_SCHEME.to_string(),
            network: "base-sepolia".to_string(),
            max_amount_required: amount.to_string(),
            resource: "/v1/chat/completions".to_string(),
            pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
            decimals,
            asset: None,
        }
    }

    #[test]
    fn amount_usd_scales_by_decimals() {
        assert_eq!(requirement("10000", 6).amount_usd().unwrap().to_string(), "0.010000");
        assert_eq!(requirement("1500000", 6).amount_usd().unwrap().to_string(), "1.500000");
        assert_eq!(requirement("7", 0).amount_usd().unwrap().to_string(), "7");
    }

    #[test]
    fn amount_usd_rejects_garbage() {
        for bad in ["", "-5", "1.5", "0x10", "abc"] {
            let err = requirement(bad, 6).amount_usd().unwrap_err();
            assert!(matches!(err, X402Error::InvalidPaymentHeader(_)), "{bad}");
        }
        assert!(requirement("1", 40).amount_usd().is_err());
    }

    #[test]
    fn decimals_default_to_six() {
        let json = r#"{"scheme":"exact","network":"base","maxAmountRequired":"1","resource":"r","payTo":"0xabc"}"#;
        let req: PaymentRequirement = serde_json::from_str(json).unwrap();
        assert_eq!(req.decimals, 6);
        assert_eq!(req.asset, None);
    }

    #[test]
    fn requirement_header_round_trip() {
        let req = PaymentRequirement {
            asset: Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string()),
            ..requirement("25000", 6)
        };
        let header = encode_header(&req).unwrap();
        let decoded: PaymentRequirement = decode_header(&header).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(encode_header(&decoded).unwrap(), header);
    }

    #[test]
    fn signed_authorization_round_trip() {
        let auth = PaymentAuthorization::new(
            requirement("10000", 6),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
            1_700_000_000,
            [7u8; 32],
        );
        assert_eq!(auth.valid_before, auth.valid_after + AUTHORIZATION_WINDOW_SECS);
        assert_eq!(auth.nonce.len(), 66);

        let signed = SignedPaymentAuthorization {
            authorization: auth,
            signature: "0xdeadbeef".to_string(),
        };
        let header = signed.to_header().unwrap();
        let decoded: SignedPaymentAuthorization = decode_header(&header).unwrap();
        assert_eq!(decoded, signed);
    }

    #[test]
    fn canonical_message_is_flat_and_ordered() {
        let auth = PaymentAuthorization::new(requirement("1", 6), "0xpayer".to_string(), 10, [0u8; 32]);
        let message = auth.canonical_message().unwrap();
        assert!(message.starts_with(r#"{"scheme":"exact","network":"base-sepolia","maxAmountRequired":"1""#));
        assert!(message.contains(r#""payer":"0xpayer","validAfter":10,"validBefore":70,"nonce":"0x00"#));
        assert!(!message.contains("signature"));
    }

    #[test]
    fn payment_response_accepts_tx_hash_alias() {
        let header: PaymentResponseHeader =
            serde_json::from_str(r#"{"txHash":"0xabc","amount":"0.01","timestamp":1700000000}"#).unwrap();
        assert_eq!(header.transaction_hash, "0xabc");
        assert_eq!(header.amount.as_deref(), Some("0.01"));
        assert_eq!(
            header.timestamp.and_then(|t| t.to_datetime()).map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn decode_header_reports_stage() {
        assert!(decode_header::<PaymentRequirement>("%%%").unwrap_err().contains("base64"));
        let not_json = b64.encode("nope");
        assert!(decode_header::<PaymentRequirement>(&not_json).unwrap_err().contains("JSON"));
    }
}
