//! KuCoin REST client.
//!
//! Signed requests carry `KC-API-SIGN` = base64(HMAC-SHA256(secret,
//! timestamp || method || path || body)) plus an encrypted passphrase
//! header (`KC-API-KEY-VERSION: 2`). Responses come in a `{code, data}`
//! envelope; any code other than `"200000"` is an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const REST_ENDPOINT: &str = "https://api.kucoin.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const OK_CODE: &str = "200000";

pub(crate) fn sign_payload(secret_key: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// `(signature, encrypted passphrase)` for one request.
pub(crate) fn sign_request(
    secret_key: &str,
    passphrase: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> (String, String) {
    let to_sign = format!("{}{}{}{}", timestamp, method, path, body);
    (sign_payload(secret_key, &to_sign), sign_payload(secret_key, passphrase))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    pub ping_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletResponse {
    pub token: String,
    pub instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level1Response {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Level2SnapshotResponse {
    pub sequence: String,
    pub bids: Vec<[Decimal; 2]>,
    pub asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAckResponse {
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailResponse {
    pub is_active: bool,
    pub cancel_exist: bool,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub currency: String,
    pub balance: Decimal,
}

#[derive(Clone)]
pub struct KuCoinRestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl KuCoinRestClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        if credentials.passphrase.is_none() {
            return Err(GatewayError::Config(
                "KuCoin requires an API passphrase".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("venue-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {}", e)))?;
        Ok(Self { client, base_url: REST_ENDPOINT.to_string(), credentials })
    }

    fn timestamp_ms() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .to_string()
    }

    fn classify_error(code: &str, msg: Option<String>) -> GatewayError {
        let message = format!("{} ({})", msg.unwrap_or_default(), code);
        // 400001..400006: key, timestamp, signature, passphrase problems
        match code {
            "400001" | "400002" | "400003" | "400004" | "400005" | "400006" => {
                GatewayError::Auth(message)
            }
            _ => GatewayError::VenueBusiness(message),
        }
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(GatewayError::Transport(format!("HTTP {}", status)));
        }
        let envelope: Envelope<T> = response.json().await?;
        if envelope.code != OK_CODE {
            return Err(Self::classify_error(&envelope.code, envelope.msg));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Protocol("envelope missing data".to_string()))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: String,
    ) -> Result<T> {
        let passphrase = self
            .credentials
            .passphrase
            .as_ref()
            .expect("checked at construction");
        let timestamp = Self::timestamp_ms();
        let (signature, encrypted_passphrase) = sign_request(
            self.credentials.secret_key.expose_secret(),
            passphrase.expose_secret(),
            &timestamp,
            method.as_str(),
            path_and_query,
            &body,
        );

        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path_and_query))
            .header("KC-API-SIGN", signature)
            .header("KC-API-TIMESTAMP", timestamp)
            .header("KC-API-KEY", self.credentials.api_key.expose_secret())
            .header("KC-API-PASSPHRASE", encrypted_passphrase)
            .header("KC-API-KEY-VERSION", "2");
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        Self::unwrap_envelope(request.send().await?).await
    }

    /// Bootstrap call that hands out the WebSocket host, token, and ping
    /// cadence.
    pub async fn bullet_public(&self) -> Result<BulletResponse> {
        let url = format!("{}/api/v1/bullet-public", self.base_url);
        Self::unwrap_envelope(self.client.post(url).send().await?).await
    }

    pub async fn get_level1(&self, symbol: &str) -> Result<Level1Response> {
        let url = format!(
            "{}/api/v1/market/orderbook/level1?symbol={}",
            self.base_url, symbol
        );
        Self::unwrap_envelope(self.client.get(url).send().await?).await
    }

    /// Full-depth snapshot; authenticated on this venue.
    pub async fn get_level2_snapshot(&self, symbol: &str) -> Result<Level2SnapshotResponse> {
        let path = format!("/api/v3/market/orderbook/level2?symbol={}", symbol);
        self.signed(Method::GET, &path, String::new()).await
    }

    /// Server timestamp, used only for RTT sampling.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v1/timestamp", self.base_url);
        Self::unwrap_envelope::<serde_json::Value>(self.client.get(url).send().await?)
            .await
            .map(|_| ())
    }

    pub async fn create_order(
        &self,
        client_oid: &str,
        symbol: &str,
        side: &str,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderAckResponse> {
        let body = serde_json::json!({
            "clientOid": client_oid,
            "side": side,
            "symbol": symbol,
            "type": "limit",
            "price": price.to_string(),
            "size": size.to_string(),
        })
        .to_string();
        self.signed(Method::POST, "/api/v1/orders", body).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderDetailResponse> {
        let path = format!("/api/v1/orders/{}", order_id);
        self.signed(Method::GET, &path, String::new()).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/api/v1/orders/{}", order_id);
        self.signed::<serde_json::Value>(Method::DELETE, &path, String::new())
            .await
            .map(|_| ())
    }

    pub async fn get_accounts(&self) -> Result<Vec<AccountEntry>> {
        self.signed(Method::GET, "/api/v1/accounts", String::new()).await
    }
}

impl std::fmt::Debug for KuCoinRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KuCoinRestClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2, checked through the base64 wrapper.
    #[test]
    fn hmac_payload_signature_matches_rfc_vector() {
        let signature = sign_payload("Jefe", "what do ya want for nothing?");
        let digest = BASE64.decode(signature).unwrap();
        assert_eq!(
            hex::encode(digest),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn request_signature_concatenates_in_order() {
        let (with_parts, _) =
            sign_request("secret", "pass", "1700000000000", "GET", "/api/v1/accounts", "");
        let direct = sign_payload("secret", "1700000000000GET/api/v1/accounts");
        assert_eq!(with_parts, direct);
    }

    #[test]
    fn passphrase_is_hmac_of_passphrase_not_timestamp() {
        let (_, encrypted) =
            sign_request("secret", "pass", "1700000000000", "GET", "/x", "");
        assert_eq!(encrypted, sign_payload("secret", "pass"));
    }

    #[test]
    fn error_classification() {
        assert!(matches!(
            KuCoinRestClient::classify_error("400005", Some("Invalid KC-API-SIGN".into())),
            GatewayError::Auth(_)
        ));
        assert!(matches!(
            KuCoinRestClient::classify_error("200004", Some("Balance insufficient".into())),
            GatewayError::VenueBusiness(_)
        ));
    }

    #[test]
    fn level2_snapshot_decodes() {
        let body = r#"{
            "sequence": "3262786978",
            "bids": [["6500.12", "0.45054140"]],
            "asks": [["6500.16", "0.57753524"]]
        }"#;
        let snapshot: Level2SnapshotResponse = serde_json::from_str(body).unwrap();
        assert_eq!(snapshot.sequence, "3262786978");
        assert_eq!(snapshot.bids[0][0], "6500.12".parse().unwrap());
    }
}
