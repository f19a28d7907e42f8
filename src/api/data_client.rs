//! Polymarket Data API client for activity and positions, plus the USDC balance read.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::models::{ActivityKind, ExecutionStatus, Position, TradeActivity, TradeSide};

use super::types::*;
use super::AccountData;

pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";
pub const DEFAULT_RPC_URL: &str = "https://polygon-rpc.com";
/// USDC.e on Polygon
pub const USDC_CONTRACT: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

const USDC_DECIMALS: u32 = 6;
/// `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Client for the read-only account data the copier needs.
pub struct DataClient {
    client: Client,
    base_url: String,
    rpc_url: String,
    usdc_contract: Address,
    timeout: Duration,
}

impl DataClient {
    /// Create a client. `timeout` bounds every request including its retries.
    pub fn new(base_url: &str, rpc_url: &str, usdc_contract: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let usdc_contract = Address::from_str(usdc_contract)
            .with_context(|| format!("Invalid USDC contract address: {}", usdc_contract))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rpc_url: rpc_url.to_string(),
            usdc_contract,
            timeout,
        })
    }

    /// Fetch the most recent activity page for a wallet.
    pub async fn get_activity(&self, address: &str, limit: u32) -> Result<Vec<TradeActivity>> {
        let url = format!(
            "{}/activity?user={}&limit={}&offset=0",
            self.base_url,
            address,
            limit.min(500)
        );

        debug!(url = %url, "Fetching activity");

        let items: Vec<ActivityResponse> = self.get_json(&url, "activity").await?;

        Ok(items
            .into_iter()
            .map(|item| activity_from_response(address, item))
            .collect())
    }

    /// Fetch open positions for a wallet.
    pub async fn get_positions(&self, address: &str) -> Result<Vec<Position>> {
        let url = format!("{}/positions?user={}&sizeThreshold=0", self.base_url, address);

        debug!(url = %url, "Fetching positions");

        let items: Vec<PositionResponse> = self.get_json(&url, "positions").await?;

        Ok(items
            .into_iter()
            .map(|p| Position {
                wallet: address.to_string(),
                asset_id: p.asset,
                market_id: p.condition_id,
                title: p.title,
                outcome: p.outcome,
                size: p.size,
                avg_price: p.avg_price,
                current_price: p.cur_price,
                current_value: p.current_value,
                cash_pnl: p.cash_pnl,
                redeemable: p.redeemable,
                end_date: p.end_date.unwrap_or_default(),
            })
            .collect())
    }

    /// Read the wallet's USDC balance with an `eth_call` to `balanceOf`.
    pub async fn get_usdc_balance(&self, address: &str) -> Result<Decimal> {
        let owner = Address::from_str(address)
            .with_context(|| format!("Invalid wallet address: {}", address))?;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_call",
            params: json!([
                {
                    "to": format!("{:?}", self.usdc_contract),
                    "data": balance_of_calldata(&owner),
                },
                "latest"
            ]),
        };

        debug!(wallet = %address, "Fetching USDC balance");

        let response: RpcResponse = self.post_json(&self.rpc_url, &request, "balance").await?;

        if let Some(err) = response.error {
            anyhow::bail!("balanceOf call failed: {} ({})", err.message, err.code);
        }

        let raw = response
            .result
            .ok_or_else(|| anyhow!("balanceOf returned no result"))?;

        parse_usdc_amount(&raw)
    }

    /// GET a JSON document, retrying rate limits and server errors until the timeout elapses.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &'static str) -> Result<T> {
        let request = || self.client.get(url);
        self.send_with_retry(request, what).await
    }

    async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
        what: &'static str,
    ) -> Result<T> {
        let request = || self.client.post(url).json(body);
        self.send_with_retry(request, what).await
    }

    async fn send_with_retry<T, F>(&self, request: F, what: &'static str) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(self.timeout),
            ..Default::default()
        };

        let request = &request;
        retry(policy, || async move {
            let response = request().send().await.map_err(|e| {
                let transient = e.is_connect();
                let err = anyhow::Error::new(e).context(format!("Failed to fetch {}", what));
                if transient {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(status = %status, what, "Retryable response from API");
                return Err(backoff::Error::transient(anyhow!(
                    "{} request failed: {}",
                    what,
                    status
                )));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(anyhow!(
                    "{} request failed: {} - {}",
                    what,
                    status,
                    body
                )));
            }

            response.json::<T>().await.map_err(|e| {
                backoff::Error::permanent(
                    anyhow::Error::new(e).context(format!("Failed to parse {} response", what)),
                )
            })
        })
        .await
    }
}

#[async_trait]
impl AccountData for DataClient {
    async fn recent_activity(&self, wallet: &str, limit: u32) -> Result<Vec<TradeActivity>> {
        self.get_activity(wallet, limit).await
    }

    async fn positions(&self, wallet: &str) -> Result<Vec<Position>> {
        self.get_positions(wallet).await
    }

    async fn balance(&self, wallet: &str) -> Result<Decimal> {
        self.get_usdc_balance(wallet).await
    }
}

/// Convert a feed item into a fresh, unexecuted queue record.
fn activity_from_response(address: &str, item: ActivityResponse) -> TradeActivity {
    let side = TradeSide::from_api(&item.side);
    let wallet = if item.proxy_wallet.is_empty() {
        address.to_string()
    } else {
        item.proxy_wallet
    };

    let id = item
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| activity_id(&wallet, &item.transaction_hash, &item.asset, side, item.timestamp));

    let kind = if item.activity_type.is_empty() {
        ActivityKind::Trade
    } else {
        ActivityKind::from_api(&item.activity_type)
    };

    TradeActivity {
        id,
        wallet,
        timestamp: item.timestamp,
        market_id: item.condition_id,
        asset_id: item.asset,
        kind,
        side,
        size: item.size,
        notional: item.usdc_size,
        price: item.price,
        outcome_label: item.outcome,
        outcome_index: item.outcome_index,
        title: item.title,
        slug: item.slug,
        transaction_hash: item.transaction_hash,
        execution_status: ExecutionStatus::Pending,
        attempt_count: 0,
    }
}

/// Dedup key for feed items, which carry no id of their own.
pub fn activity_id(
    wallet: &str,
    transaction_hash: &str,
    asset: &str,
    side: Option<TradeSide>,
    timestamp: i64,
) -> String {
    if transaction_hash.is_empty() {
        format!("{}_{}_{}", wallet, timestamp, asset)
    } else {
        let side = side.map(|s| s.as_str()).unwrap_or("NONE");
        format!("{}:{}:{}", transaction_hash, asset, side)
    }
}

fn balance_of_calldata(owner: &Address) -> String {
    format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, hex::encode(owner.as_slice()))
}

/// Parse a hex-encoded uint256 token amount into USDC.
fn parse_usdc_amount(raw: &str) -> Result<Decimal> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let value = U256::from_str_radix(digits, 16)
        .with_context(|| format!("Invalid balanceOf result: {}", raw))?;
    let units = u128::try_from(value).map_err(|_| anyhow!("Balance out of range: {}", raw))?;
    let units = i128::try_from(units).map_err(|_| anyhow!("Balance out of range: {}", raw))?;

    Decimal::try_from_i128_with_scale(units, USDC_DECIMALS)
        .map_err(|e| anyhow!("Balance out of range: {} ({})", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_of_calldata() {
        let owner = Address::from_str("0x1111111111111111111111111111111111111111").unwrap();
        let data = balance_of_calldata(&owner);

        assert!(data.starts_with("0x70a08231"));
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.ends_with("1111111111111111111111111111111111111111"));
        assert_eq!(&data[10..34], "000000000000000000000000");
    }

    #[test]
    fn test_parse_usdc_amount() {
        // 12.345678 USDC
        assert_eq!(parse_usdc_amount("0xbc614e").unwrap(), dec!(12.345678));
        assert_eq!(parse_usdc_amount("0x").unwrap(), Decimal::ZERO);
        assert_eq!(
            parse_usdc_amount("0x0000000000000000000000000000000000000000000000000000000000000000")
                .unwrap(),
            Decimal::ZERO
        );
        assert!(parse_usdc_amount("0xzz").is_err());
    }

    #[test]
    fn test_activity_id_derivation() {
        assert_eq!(
            activity_id("0xw", "0xtx", "77", Some(TradeSide::Sell), 5),
            "0xtx:77:SELL"
        );
        assert_eq!(activity_id("0xw", "", "77", None, 5), "0xw_5_77");
    }

    #[test]
    fn test_activity_from_response() {
        let item: ActivityResponse = serde_json::from_str(
            r#"{"timestamp": 1700000000, "conditionId": "0xc", "type": "TRADE",
                "size": 40, "usdcSize": 20, "price": 0.5, "asset": "9",
                "side": "BUY", "outcome": "Yes", "transactionHash": "0xtx"}"#,
        )
        .unwrap();

        let activity = activity_from_response("0xtarget", item);
        assert_eq!(activity.id, "0xtx:9:BUY");
        assert_eq!(activity.wallet, "0xtarget");
        assert_eq!(activity.kind, ActivityKind::Trade);
        assert_eq!(activity.side, Some(TradeSide::Buy));
        assert_eq!(activity.notional, dec!(20));
        assert_eq!(activity.execution_status, ExecutionStatus::Pending);
        assert_eq!(activity.attempt_count, 0);
    }
}
