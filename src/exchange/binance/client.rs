//! BinanceUS REST client.
//!
//! Wraps `reqwest` with the venue base URL, a request deadline, and
//! HMAC-SHA256 query signing (`&signature=`, `X-MBX-APIKEY` header).

use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const REST_ENDPOINT: &str = "https://api.binance.us";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HMAC-SHA256 of the encoded query string, hex-encoded. Factored out so
/// the vector from the venue's docs pins it down.
pub(crate) fn sign_query(secret_key: &str, query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerResponse {
    #[serde(rename = "bidPrice")]
    pub bid_price: Decimal,
    #[serde(rename = "askPrice")]
    pub ask_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[Decimal; 2]>,
    pub asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderAckResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusResponse {
    pub status: String,
    pub price: Decimal,
    #[serde(rename = "executedQty")]
    pub executed_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct VenueErrorBody {
    code: i64,
    msg: String,
}

#[derive(Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl BinanceRestClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("venue-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {}", e)))?;
        Ok(Self { client, base_url: REST_ENDPOINT.to_string(), credentials })
    }

    fn timestamp_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn signed_url(&self, path: &str, query: &str) -> String {
        let signature = sign_query(self.credentials.secret_key.expose_secret(), query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    fn signed_request(&self, method: Method, path: &str, query: &str) -> RequestBuilder {
        self.client
            .request(method, self.signed_url(path, query))
            .header("X-MBX-APIKEY", self.credentials.api_key.expose_secret())
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        // Error bodies carry {code, msg}; fold them into the taxonomy.
        let body = response.text().await.unwrap_or_default();
        if let Ok(venue_error) = serde_json::from_str::<VenueErrorBody>(&body) {
            return Err(match venue_error.code {
                -1022 | -2014 | -2015 => {
                    GatewayError::Auth(format!("{} ({})", venue_error.msg, venue_error.code))
                }
                _ if status.as_u16() == 429 || status.is_server_error() => {
                    GatewayError::Transport(format!("HTTP {}: {}", status, venue_error.msg))
                }
                _ => GatewayError::VenueBusiness(format!(
                    "{} ({})",
                    venue_error.msg, venue_error.code
                )),
            });
        }
        Err(GatewayError::Transport(format!("HTTP {}: {}", status, body)))
    }

    pub async fn get_book_ticker(&self, symbol: &str) -> Result<BookTickerResponse> {
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, symbol);
        Self::decode(self.client.get(url).send().await?).await
    }

    pub async fn get_depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshotResponse> {
        let url =
            format!("{}/api/v3/depth?symbol={}&limit={}", self.base_url, symbol, limit);
        Self::decode(self.client.get(url).send().await?).await
    }

    /// Unauthenticated liveness probe, used only for RTT sampling.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let response = self.client.get(url).send().await?;
        Self::decode::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn create_order(
        &self,
        symbol: &str,
        side: &str,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<OrderAckResponse> {
        let query = format!(
            "symbol={}&side={}&type=LIMIT&timeInForce=GTC&price={}&quantity={}&timestamp={}",
            symbol,
            side,
            price,
            quantity,
            Self::timestamp_ms()
        );
        let response = self.signed_request(Method::POST, "/api/v3/order", &query).send().await?;
        Self::decode(response).await
    }

    pub async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderStatusResponse> {
        let query = format!(
            "symbol={}&orderId={}&timestamp={}",
            symbol,
            order_id,
            Self::timestamp_ms()
        );
        let response = self.signed_request(Method::GET, "/api/v3/order", &query).send().await?;
        Self::decode(response).await
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let query = format!(
            "symbol={}&orderId={}&timestamp={}",
            symbol,
            order_id,
            Self::timestamp_ms()
        );
        let response =
            self.signed_request(Method::DELETE, "/api/v3/order", &query).send().await?;
        Self::decode::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn get_account(&self) -> Result<AccountResponse> {
        let query = format!("timestamp={}", Self::timestamp_ms());
        let response =
            self.signed_request(Method::GET, "/api/v3/account", &query).send().await?;
        Self::decode(response).await
    }
}

impl std::fmt::Debug for BinanceRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vector from the venue's signed-endpoint documentation.
    #[test]
    fn signature_matches_published_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1\
                     &price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signature_changes_with_input() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let a = sign_query(secret, "timestamp=1");
        let b = sign_query(secret, "timestamp=2");
        assert_ne!(a, b);
    }

    #[test]
    fn depth_snapshot_decodes_string_levels() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;
        let snapshot: DepthSnapshotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.last_update_id, 1027024);
        assert_eq!(snapshot.bids[0][0], "4.00000000".parse().unwrap());
        assert_eq!(snapshot.asks[0][1], "12".parse::<Decimal>().unwrap());
    }
}
