//! Kraken REST client.
//!
//! Private endpoints are form-POSTs signed with
//! `base64(HMAC-SHA512(base64decode(secret), path || SHA256(nonce || postdata)))`
//! under `API-Key` / `API-Sign` headers. Responses arrive in an
//! `{error: [], result: ...}` envelope; a non-empty error list is folded
//! into the error taxonomy instead of aborting.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{GatewayError, Result};

type HmacSha512 = Hmac<Sha512>;

pub const REST_ENDPOINT: &str = "https://api.kraken.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Kraken API-Sign for one private request. `post_data` is the encoded form
/// body with keys in alphabetical order (it includes the nonce field).
pub(crate) fn sign_request(
    secret_key_b64: &str,
    path: &str,
    nonce: &str,
    post_data: &str,
) -> Result<String> {
    let secret = BASE64
        .decode(secret_key_b64)
        .map_err(|e| GatewayError::Config(format!("secret key is not base64: {}", e)))?;

    let mut digest = Sha256::new();
    digest.update(nonce.as_bytes());
    digest.update(post_data.as_bytes());
    let digest = digest.finalize();

    let mut mac = HmacSha512::new_from_slice(&secret)
        .expect("HMAC accepts keys of any length");
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerEntry {
    /// `[price, whole lot volume, lot volume]`
    pub a: Vec<String>,
    pub b: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepthEntry {
    pub asks: Vec<Vec<serde_json::Value>>,
    pub bids: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderResult {
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueriedOrder {
    pub status: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub vol_exec: Option<Decimal>,
}

#[derive(Clone)]
pub struct KrakenRestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl KrakenRestClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("venue-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {}", e)))?;
        Ok(Self { client, base_url: REST_ENDPOINT.to_string(), credentials })
    }

    fn nonce() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .to_string()
    }

    fn classify_error(errors: &[String]) -> GatewayError {
        let joined = errors.join("; ");
        if errors.iter().any(|e| e.starts_with("EAPI:") || e.starts_with("EAuth:")) {
            return GatewayError::Auth(joined);
        }
        if errors
            .iter()
            .any(|e| e.starts_with("EService:") || e.contains("Temporary") || e.contains("Timeout"))
        {
            return GatewayError::Transport(joined);
        }
        GatewayError::VenueBusiness(joined)
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!("HTTP {}: {}", status, body)));
        }
        let envelope: Envelope<T> = response.json().await?;
        if !envelope.error.is_empty() {
            return Err(Self::classify_error(&envelope.error));
        }
        envelope
            .result
            .ok_or_else(|| GatewayError::Protocol("envelope missing result".to_string()))
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        Self::unwrap_envelope(self.client.get(url).send().await?).await
    }

    /// Signed form POST. `post_data` must already contain `nonce={nonce}`
    /// with keys alphabetically ordered.
    async fn private<T: DeserializeOwned>(
        &self,
        path: &str,
        nonce: &str,
        post_data: String,
    ) -> Result<T> {
        let signature = sign_request(
            self.credentials.secret_key.expose_secret(),
            path,
            nonce,
            &post_data,
        )?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", self.credentials.api_key.expose_secret())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post_data)
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }

    pub async fn get_ticker(&self, pair: &str) -> Result<TickerEntry> {
        let result: HashMap<String, TickerEntry> =
            self.public("/0/public/Ticker", &format!("pair={}", pair)).await?;
        result
            .get(pair)
            .cloned()
            .or_else(|| result.into_values().next())
            .ok_or_else(|| GatewayError::Protocol(format!("no ticker entry for {}", pair)))
    }

    pub async fn get_depth(&self, pair: &str, count: usize) -> Result<DepthEntry> {
        let result: HashMap<String, DepthEntry> = self
            .public("/0/public/Depth", &format!("pair={}&count={}", pair, count))
            .await?;
        result
            .into_values()
            .next()
            .ok_or_else(|| GatewayError::Protocol(format!("no depth entry for {}", pair)))
    }

    /// Server time, used only for RTT sampling.
    pub async fn ping(&self) -> Result<()> {
        self.public::<serde_json::Value>("/0/public/Time", "").await.map(|_| ())
    }

    pub async fn add_order(
        &self,
        pair: &str,
        side: &str,
        price: Decimal,
        volume: Decimal,
    ) -> Result<AddOrderResult> {
        let nonce = Self::nonce();
        let post_data = format!(
            "nonce={}&ordertype=limit&pair={}&price={}&type={}&volume={}",
            nonce, pair, price, side, volume
        );
        self.private("/0/private/AddOrder", &nonce, post_data).await
    }

    /// Batched status query: one request for any number of txids.
    pub async fn query_orders(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, QueriedOrder>> {
        let nonce = Self::nonce();
        let post_data = format!("nonce={}&txid={}", nonce, txids.join(","));
        self.private("/0/private/QueryOrders", &nonce, post_data).await
    }

    /// Batched cancel: the venue accepts a comma-joined txid list.
    pub async fn cancel_orders(&self, txids: &[String]) -> Result<()> {
        let nonce = Self::nonce();
        let post_data = format!("nonce={}&txid={}", nonce, txids.join(","));
        self.private::<serde_json::Value>("/0/private/CancelOrder", &nonce, post_data)
            .await
            .map(|_| ())
    }

    pub async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        let nonce = Self::nonce();
        let post_data = format!("nonce={}", nonce);
        let raw: HashMap<String, String> =
            self.private("/0/private/Balance", &nonce, post_data).await?;
        raw.into_iter()
            .map(|(asset, balance)| {
                let balance = balance.parse::<Decimal>().map_err(|e| {
                    GatewayError::Protocol(format!("bad balance {:?}: {}", balance, e))
                })?;
                Ok((asset, balance))
            })
            .collect()
    }
}

impl std::fmt::Debug for KrakenRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenRestClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}
