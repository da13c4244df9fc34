use crate::{
    client::{
        nonce::{FreshNonces, NonceSource},
        wallet::SigningWallet,
    },
    error::{Result, X402Error},
    models::{
        decode_header, payment::PaymentResponseHeader, PaymentAuthorization, PaymentProof,
        PaymentRequirement, Settlement, SignedPaymentAuthorization, EXACT_SCHEME,
    },
};
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub const PAYMENT_HEADER: &str = "X-PAYMENT";
pub const PAYMENT_REQUIRED_HEADER: &str = "X-PAYMENT-REQUIRED";
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Signed attempts allowed per request before giving up.
pub const MAX_PAYMENT_ATTEMPTS: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A request relative to the negotiator's base URL. Rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct NegotiatedResponse {
    pub response: Response,
    pub settlement: Settlement,
    /// Number of signed payment attempts sent.
    pub attempts: u32,
}

/// Client side of the x402 handshake.
///
/// Construct once and share by reference; it holds configuration only.
pub struct PaymentNegotiator {
    client: Client,
    base_url: String,
    network: String,
    max_payment_usd: Decimal,
    wallet: Arc<dyn SigningWallet>,
    nonces: FreshNonces,
}

impl PaymentNegotiator {
    pub fn new(
        base_url: impl Into<String>,
        network: impl Into<String>,
        max_payment_usd: Decimal,
        wallet: Arc<dyn SigningWallet>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let negotiator = Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            network: network.into(),
            max_payment_usd,
            wallet,
            nonces: FreshNonces::default(),
        };

        tracing::info!(
            "Payment negotiator ready: wallet {} on {}, cap ${}",
            negotiator.wallet.checksum_address(),
            negotiator.network,
            negotiator.max_payment_usd
        );

        Ok(negotiator)
    }

    pub fn with_nonce_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.nonces = FreshNonces::new(source);
        self
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn wallet(&self) -> &dyn SigningWallet {
        self.wallet.as_ref()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn max_payment_usd(&self) -> Decimal {
        self.max_payment_usd
    }

    /// Sends `request`, paying for it if the server answers 402.
    pub async fn negotiate(&self, request: &ApiRequest) -> Result<NegotiatedResponse> {
        let mut response = self.send(request, None).await?;
        let mut attempts = 0u32;
        let mut paid: Option<(PaymentRequirement, Decimal)> = None;

        while response.status() == StatusCode::PAYMENT_REQUIRED {
            if attempts >= MAX_PAYMENT_ATTEMPTS {
                tracing::warn!(
                    "Still 402 on {} after {} signed attempts",
                    request.path,
                    attempts
                );
                return Err(X402Error::PaymentRetriesExhausted { attempts });
            }

            let requirement = read_requirement(&response)?;
            let amount_usd = self.check_limit(&requirement)?;

            let authorization = self.authorize(&requirement).await?;
            let header = authorization.to_header()?;
            attempts += 1;

            tracing::info!(
                attempt = attempts,
                amount_usd = %amount_usd,
                pay_to = %requirement.pay_to,
                "Paying for {}",
                requirement.resource
            );

            response = self.send(request, Some(header)).await?;
            paid = Some((requirement, amount_usd));
        }

        let settlement = match paid {
            None => Settlement::Free,
            Some((requirement, amount_usd)) => {
                read_settlement(&response, &requirement, amount_usd)
            }
        };

        if let Settlement::Settled(proof) = &settlement {
            tracing::info!("Payment settled: {} (${})", proof.transaction_hash, proof.amount);
        }

        Ok(NegotiatedResponse {
            response,
            settlement,
            attempts,
        })
    }

    /// Builds and signs a fresh authorization for `requirement`.
    pub async fn authorize(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<SignedPaymentAuthorization> {
        let nonce = self.nonces.next()?;
        let now = u64::try_from(Utc::now().timestamp())
            .map_err(|_| X402Error::Signing("system clock is before the unix epoch".to_string()))?;

        let authorization = PaymentAuthorization::new(
            requirement.clone(),
            self.wallet.checksum_address(),
            now,
            nonce,
        );
        let message = authorization.canonical_message()?;
        let signature = self.wallet.sign(&message).await?;

        Ok(SignedPaymentAuthorization {
            authorization,
            signature,
        })
    }

    fn check_limit(&self, requirement: &PaymentRequirement) -> Result<Decimal> {
        if requirement.scheme != EXACT_SCHEME {
            return Err(X402Error::InvalidPaymentHeader(format!(
                "unsupported payment scheme: {}",
                requirement.scheme
            )));
        }

        if requirement.network != self.network {
            tracing::warn!(
                "Server asks for payment on {}, configured network is {}",
                requirement.network,
                self.network
            );
        }

        let amount = requirement.amount_usd()?;
        if amount > self.max_payment_usd {
            tracing::warn!("Refusing to pay ${} (limit ${})", amount, self.max_payment_usd);
            return Err(X402Error::PaymentLimitExceeded {
                amount,
                limit: self.max_payment_usd,
            });
        }

        Ok(amount)
    }

    async fn send(&self, request: &ApiRequest, payment: Option<String>) -> Result<Response> {
        let url = if request.path.starts_with('/') {
            format!("{}{}", self.base_url, request.path)
        } else {
            format!("{}/{}", self.base_url, request.path)
        };

        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(payment) = payment {
            builder = builder.header(PAYMENT_HEADER, payment);
        }

        let response = builder.send().await?;
        tracing::debug!("{} {} -> {}", request.method, url, response.status());

        Ok(response)
    }
}

fn read_requirement(response: &Response) -> Result<PaymentRequirement> {
    let raw = response
        .headers()
        .get(PAYMENT_REQUIRED_HEADER)
        .ok_or(X402Error::MissingPaymentHeader)?
        .to_str()
        .map_err(|e| X402Error::InvalidPaymentHeader(format!("non-ASCII header: {}", e)))?;

    decode_header(raw).map_err(X402Error::InvalidPaymentHeader)
}

/// Reads the payment proof. Failure here never fails the request, which already succeeded.
fn read_settlement(
    response: &Response,
    requirement: &PaymentRequirement,
    amount_usd: Decimal,
) -> Settlement {
    if !response.status().is_success() {
        return Settlement::Unconfirmed {
            reason: format!("paid request failed with {}", response.status()),
        };
    }

    let Some(raw) = response.headers().get(PAYMENT_RESPONSE_HEADER) else {
        return Settlement::Unconfirmed {
            reason: format!("no {} header", PAYMENT_RESPONSE_HEADER),
        };
    };

    let decoded = raw
        .to_str()
        .map_err(|e| e.to_string())
        .and_then(decode_header::<PaymentResponseHeader>);

    match decoded {
        Ok(header) => Settlement::Settled(PaymentProof {
            transaction_hash: header.transaction_hash,
            amount: header
                .amount
                .unwrap_or_else(|| amount_usd.normalize().to_string()),
            network: header
                .network
                .unwrap_or_else(|| requirement.network.clone()),
            timestamp: header
                .timestamp
                .and_then(|ts| ts.to_datetime())
                .unwrap_or_else(Utc::now),
        }),
        Err(reason) => {
            tracing::warn!("Could not decode payment response: {}", reason);
            Settlement::Unconfirmed { reason }
        }
    }
}
