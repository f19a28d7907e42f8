//! Polymarket CLOB (Central Limit Order Book) client for order execution.
//!
//! The CLOB is Polymarket's off-chain order matching engine that settles on Polygon.
//! This client handles:
//! - Order book and last trade price reads (public)
//! - Order signing using EIP-712 typed data
//! - Fill-or-kill order submission with L2 (HMAC) authentication
//!
//! Without a signer the client is read-only. In dry-run mode orders are logged
//! and reported as filled without being signed or posted.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{OrderBook, OrderReceipt, OrderRequest, TradeSide};

use super::auth::ApiCredentials;
use super::types::LastTradePriceResponse;
use super::OrderVenue;

/// CLOB API base URL
pub const CLOB_URL: &str = "https://clob.polymarket.com";

/// Polymarket CTF Exchange contract on Polygon
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
/// Slippage applied to the best ask when sizing a market buy.
const BUY_SLIPPAGE: Decimal = dec!(1.005);
/// Slippage applied to the best bid when sizing a market sell.
const SELL_SLIPPAGE: Decimal = dec!(0.995);
const MIN_PRICE: Decimal = dec!(0.01);
const MAX_PRICE: Decimal = dec!(0.99);
const PRICE_DECIMALS: u32 = 2;
const SIZE_DECIMALS: u32 = 2;
const AMOUNT_DECIMALS: u32 = 4;
/// Conditional tokens and USDC both use 6 decimals on chain.
const TOKEN_DECIMALS: u32 = 6;

/// Order side in the CLOB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

impl From<TradeSide> for OrderSide {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Buy => OrderSide::Buy,
            TradeSide::Sell => OrderSide::Sell,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill-or-kill
    Fok,
}

/// Signature type for CLOB orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// EOA signature
    Eoa = 0,
    /// Polymarket proxy signature
    Poly = 1,
    /// Polymarket proxy signature (gnosis safe)
    PolyGnosisSafe = 2,
}

impl TryFrom<u8> for SignatureType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SignatureType::Eoa),
            1 => Ok(SignatureType::Poly),
            2 => Ok(SignatureType::PolyGnosisSafe),
            other => Err(anyhow!("Unknown signature type: {}", other)),
        }
    }
}

/// Signed order ready for submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: OrderSide,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Order submission request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order: SignedOrder,
    pub owner: String,
    pub order_type: OrderType,
}

/// Price and on-chain amounts of an order about to be signed.
#[derive(Debug, Clone, PartialEq)]
struct OrderAmounts {
    side: OrderSide,
    price: Decimal,
    maker_amount: String,
    taker_amount: String,
}

/// Signing identity: the key, the funding wallet it trades for, and the CLOB credentials.
struct TradingAccount {
    signer: PrivateKeySigner,
    funder: Address,
    signature_type: SignatureType,
    credentials: ApiCredentials,
}

/// CLOB API client for executing trades on Polymarket.
pub struct ClobClient {
    http: Client,
    base_url: String,
    chain_id: u64,
    account: Option<TradingAccount>,
    dry_run: bool,
}

impl ClobClient {
    /// Create a read-only client (order book and prices only).
    pub fn new(base_url: &str, chain_id: u64, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
            account: None,
            dry_run: false,
        })
    }

    /// Attach a signing key so orders can be submitted.
    ///
    /// # Arguments
    /// * `private_key` - Ethereum private key (hex string, with or without 0x prefix)
    /// * `funder` - Wallet holding the funds (the proxy wallet for signature type 1)
    /// * `signature_type` - 0 = EOA, 1 = Polymarket proxy, 2 = Gnosis safe
    /// * `credentials` - CLOB API key, secret and passphrase
    pub fn with_signer(
        mut self,
        private_key: &str,
        funder: &str,
        signature_type: SignatureType,
        credentials: ApiCredentials,
    ) -> Result<Self> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;
        let funder = Address::from_str(funder)
            .with_context(|| format!("Invalid funder address: {}", funder))?;

        self.account = Some(TradingAccount {
            signer,
            funder,
            signature_type,
            credentials,
        });
        Ok(self)
    }

    /// Log orders instead of posting them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Get the signing address, if a key is attached.
    pub fn address(&self) -> Option<Address> {
        self.account.as_ref().map(|a| a.signer.address())
    }

    /// Get order book for a token.
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let resp = self.http.get(&url).send().await.context("Failed to fetch order book")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Failed to get order book: {} - {}", status, text);
        }

        resp.json().await.context("Failed to parse order book")
    }

    /// Get the price of the most recent fill for a token.
    pub async fn get_last_trade_price(&self, token_id: &str) -> Result<Decimal> {
        let url = format!("{}/last-trade-price?token_id={}", self.base_url, token_id);
        let resp = self.http.get(&url).send().await.context("Failed to fetch last trade price")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Failed to get last trade price: {} - {}", status, text);
        }

        let body: LastTradePriceResponse = resp.json().await.context("Failed to parse last trade price")?;
        Ok(body.price)
    }

    /// Submit a fill-or-kill order.
    ///
    /// Returns `Err` when the order could not be built or sent; a venue-side
    /// rejection comes back as an unsuccessful receipt.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let amounts = match request {
            OrderRequest::Market {
                asset_id,
                side,
                amount,
            } => {
                let book = self.get_order_book(asset_id).await?;
                market_amounts(&book, *side, *amount)?
            }
            OrderRequest::Limit {
                side, price, size, ..
            } => limit_amounts(*side, *price, *size)?,
        };

        if self.dry_run {
            info!(
                asset = %request.asset_id(),
                side = ?amounts.side,
                price = %amounts.price,
                maker_amount = %amounts.maker_amount,
                taker_amount = %amounts.taker_amount,
                "[DRY RUN] Would submit FOK order"
            );
            return Ok(OrderReceipt {
                order_id: Some(format!("dry-run-{}", uuid::Uuid::new_v4())),
                success: true,
                status: Some("dry_run".to_string()),
                ..Default::default()
            });
        }

        let account = self
            .account
            .as_ref()
            .ok_or_else(|| anyhow!("Order submission requires a private key"))?;

        let signed_order = self
            .build_signed_order(account, request.asset_id(), &amounts)
            .await?;

        let payload = OrderPayload {
            order: signed_order,
            owner: account.credentials.api_key.clone(),
            order_type: OrderType::Fok,
        };
        let body = serde_json::to_string(&payload).context("Failed to encode order")?;

        let path = "/order";
        let headers = account.credentials.l2_headers(
            &format!("{:?}", account.signer.address()),
            Utc::now().timestamp(),
            "POST",
            path,
            &body,
        )?;

        debug!(asset = %request.asset_id(), price = %amounts.price, "Posting order");

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("Failed to post order")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Order rejected by CLOB");
            return Ok(OrderReceipt::rejected(format!("{} - {}", status, text)));
        }

        resp.json().await.context("Failed to parse order response")
    }

    /// Build a signed order for submission.
    async fn build_signed_order(
        &self,
        account: &TradingAccount,
        token_id: &str,
        amounts: &OrderAmounts,
    ) -> Result<SignedOrder> {
        let maker = format!("{:?}", account.funder);
        let signer = format!("{:?}", account.signer.address());
        let taker = ZERO_ADDRESS.to_string();

        // FOK orders never expire on their own and use the zero nonce.
        let expiration = "0".to_string();
        let nonce = "0".to_string();
        let fee_rate_bps = "0".to_string();
        let salt = generate_salt();

        let fields = OrderFields {
            salt: &salt,
            maker: &maker,
            signer: &signer,
            taker: &taker,
            token_id,
            maker_amount: &amounts.maker_amount,
            taker_amount: &amounts.taker_amount,
            expiration: &expiration,
            nonce: &nonce,
            fee_rate_bps: &fee_rate_bps,
            side: amounts.side.as_u8(),
            signature_type: account.signature_type as u8,
        };

        let digest = eip712_digest(&fields, self.chain_id)?;
        let signature = account
            .signer
            .sign_hash(&digest.into())
            .await
            .context("Failed to sign order")?;

        Ok(SignedOrder {
            salt,
            maker,
            signer,
            taker,
            token_id: token_id.to_string(),
            maker_amount: amounts.maker_amount.clone(),
            taker_amount: amounts.taker_amount.clone(),
            side: amounts.side,
            expiration,
            nonce,
            fee_rate_bps,
            signature_type: account.signature_type as u8,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }
}

#[async_trait]
impl OrderVenue for ClobClient {
    async fn order_book(&self, asset_id: &str) -> Result<OrderBook> {
        self.get_order_book(asset_id).await
    }

    async fn last_trade_price(&self, asset_id: &str) -> Result<Decimal> {
        self.get_last_trade_price(asset_id).await
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        self.place_order(order).await
    }
}

/// Amounts for a notional (buy) or share (sell) market order priced off the book.
fn market_amounts(book: &OrderBook, side: TradeSide, amount: Decimal) -> Result<OrderAmounts> {
    match side {
        TradeSide::Buy => {
            let ask = book.best_ask().ok_or_else(|| anyhow!("No asks available"))?;
            let price = clamp_price(ask * BUY_SLIPPAGE);
            let usdc = round_down(amount, SIZE_DECIMALS);
            let shares = usdc
                .checked_div(price)
                .map(|s| round_down(s, AMOUNT_DECIMALS))
                .ok_or_else(|| anyhow!("Invalid price {}", price))?;
            if usdc <= Decimal::ZERO || shares <= Decimal::ZERO {
                bail!("Order amount {} too small", amount);
            }

            Ok(OrderAmounts {
                side: OrderSide::Buy,
                price,
                maker_amount: to_token_units(usdc),
                taker_amount: to_token_units(shares),
            })
        }
        TradeSide::Sell => {
            let bid = book.best_bid().ok_or_else(|| anyhow!("No bids available"))?;
            limit_amounts(TradeSide::Sell, clamp_price(bid * SELL_SLIPPAGE), amount)
        }
    }
}

/// Amounts for a price + size order.
/// BUY: maker pays `size * price` USDC, receives `size` shares.
/// SELL: maker gives `size` shares, receives `size * price` USDC.
fn limit_amounts(side: TradeSide, price: Decimal, size: Decimal) -> Result<OrderAmounts> {
    let price = clamp_price(price);
    let shares = round_down(size, SIZE_DECIMALS);
    if shares <= Decimal::ZERO {
        bail!("Order size {} too small", size);
    }
    let usdc = round_down(shares * price, AMOUNT_DECIMALS);

    let (maker, taker) = match side {
        TradeSide::Buy => (usdc, shares),
        TradeSide::Sell => (shares, usdc),
    };

    Ok(OrderAmounts {
        side: side.into(),
        price,
        maker_amount: to_token_units(maker),
        taker_amount: to_token_units(taker),
    })
}

fn clamp_price(price: Decimal) -> Decimal {
    price
        .round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
        .clamp(MIN_PRICE, MAX_PRICE)
}

fn round_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Convert a decimal amount to 6-decimal on-chain units.
fn to_token_units(amount: Decimal) -> String {
    round_down(amount * Decimal::from(10u64.pow(TOKEN_DECIMALS)), 0)
        .normalize()
        .to_string()
}

/// Fields of the EIP-712 `Order` struct.
struct OrderFields<'a> {
    salt: &'a str,
    maker: &'a str,
    signer: &'a str,
    taker: &'a str,
    token_id: &'a str,
    maker_amount: &'a str,
    taker_amount: &'a str,
    expiration: &'a str,
    nonce: &'a str,
    fee_rate_bps: &'a str,
    side: u8,
    signature_type: u8,
}

/// keccak256("\x19\x01" || domainSeparator || orderHash)
fn eip712_digest(order: &OrderFields<'_>, chain_id: u64) -> Result<[u8; 32]> {
    let domain_hash = domain_separator(chain_id)?;
    let order_hash = order_struct_hash(order)?;

    let mut message = vec![0x19, 0x01];
    message.extend_from_slice(&domain_hash);
    message.extend_from_slice(&order_hash);

    Ok(alloy_primitives::keccak256(&message).0)
}

fn order_struct_hash(order: &OrderFields<'_>) -> Result<[u8; 32]> {
    let type_hash = alloy_primitives::keccak256(
        b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)"
    );

    let mut encoded = Vec::with_capacity(13 * 32);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(&encode_uint256(order.salt)?);
    encoded.extend_from_slice(&encode_address(order.maker)?);
    encoded.extend_from_slice(&encode_address(order.signer)?);
    encoded.extend_from_slice(&encode_address(order.taker)?);
    encoded.extend_from_slice(&encode_uint256(order.token_id)?);
    encoded.extend_from_slice(&encode_uint256(order.maker_amount)?);
    encoded.extend_from_slice(&encode_uint256(order.taker_amount)?);
    encoded.extend_from_slice(&encode_uint256(order.expiration)?);
    encoded.extend_from_slice(&encode_uint256(order.nonce)?);
    encoded.extend_from_slice(&encode_uint256(order.fee_rate_bps)?);
    encoded.extend_from_slice(&encode_uint8(order.side));
    encoded.extend_from_slice(&encode_uint8(order.signature_type));

    Ok(alloy_primitives::keccak256(&encoded).0)
}

fn domain_separator(chain_id: u64) -> Result<[u8; 32]> {
    let type_hash = alloy_primitives::keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );
    let name_hash = alloy_primitives::keccak256(b"Polymarket CTF Exchange");
    let version_hash = alloy_primitives::keccak256(b"1");

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(name_hash.as_slice());
    encoded.extend_from_slice(version_hash.as_slice());
    encoded.extend_from_slice(&encode_uint256(&chain_id.to_string())?);
    encoded.extend_from_slice(&encode_address(CTF_EXCHANGE)?);

    Ok(alloy_primitives::keccak256(&encoded).0)
}

/// Encode address to 32-byte padded format.
fn encode_address(addr: &str) -> Result<[u8; 32]> {
    let addr = Address::from_str(addr).with_context(|| format!("Invalid address: {}", addr))?;
    let mut buf = [0u8; 32];
    buf[12..].copy_from_slice(addr.as_slice());
    Ok(buf)
}

/// Encode a base-10 uint256.
fn encode_uint256(value: &str) -> Result<[u8; 32]> {
    let n = U256::from_str_radix(value, 10).with_context(|| format!("Invalid uint256: {}", value))?;
    Ok(n.to_be_bytes())
}

fn encode_uint8(value: u8) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[31] = value;
    buf
}

fn generate_salt() -> String {
    // Keep the salt within 2^53 so JSON consumers read it back exactly.
    (uuid::Uuid::new_v4().as_u128() & ((1u128 << 53) - 1)).to_string()
}
