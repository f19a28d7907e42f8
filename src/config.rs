//! Runtime configuration: CLI flags and environment, validated at startup.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::Args;
use rust_decimal::Decimal;

use crate::api::{ApiCredentials, SignatureType, CLOB_URL, DATA_API_BASE, DEFAULT_RPC_URL, USDC_CONTRACT};
use crate::error::CopyError;
use crate::queue::wallet_key;
use crate::trading::{RiskLimits, SizingConfig};

/// Settings for the copy loops. Most flags can also come from the environment.
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Wallet to copy
    #[arg(long, env = "USER_ADDRESS")]
    pub target_wallet: Option<String>,

    /// Wallet that places the copies (also the order funder)
    #[arg(long, env = "PROXY_WALLET")]
    pub follower_wallet: Option<String>,

    /// Signing key for live orders
    #[arg(long, env = "PK", hide_env_values = true)]
    pub private_key: Option<String>,

    #[arg(long, env = "CLOB_API_KEY", hide_env_values = true)]
    pub clob_api_key: Option<String>,

    #[arg(long, env = "CLOB_SECRET", hide_env_values = true)]
    pub clob_secret: Option<String>,

    #[arg(long, env = "CLOB_PASS_PHRASE", hide_env_values = true)]
    pub clob_passphrase: Option<String>,

    #[arg(long, env = "CLOB_HTTP_URL", default_value = CLOB_URL)]
    pub clob_url: String,

    #[arg(long, env = "DATA_API_URL", default_value = DATA_API_BASE)]
    pub data_api_url: String,

    /// Polygon JSON-RPC endpoint used for balance reads
    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    #[arg(long, env = "USDC_CONTRACT_ADDRESS", default_value = USDC_CONTRACT)]
    pub usdc_contract: String,

    #[arg(long, env = "CHAIN_ID", default_value = "137")]
    pub chain_id: u64,

    /// 0 = EOA, 1 = Polymarket proxy, 2 = Gnosis safe
    #[arg(long, env = "SIGNATURE_TYPE", default_value = "1")]
    pub signature_type: u8,

    /// Seconds between activity polls
    #[arg(long, env = "FETCH_INTERVAL", default_value = "5")]
    pub fetch_interval: u64,

    /// Seconds after which an observed trade is too old to copy
    #[arg(long, env = "TOO_OLD_TIMESTAMP", default_value = "3600")]
    pub too_old_timestamp: i64,

    /// Attempts per trade before it is given up
    #[arg(long, env = "RETRY_LIMIT", default_value = "3")]
    pub retry_limit: u32,

    /// Seconds allowed for any single external call
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "10")]
    pub request_timeout: u64,

    /// Seconds between executor passes over the queue
    #[arg(long, env = "EXECUTOR_INTERVAL", default_value = "2")]
    pub executor_interval: u64,

    /// Activity items requested per poll
    #[arg(long, env = "ACTIVITY_PAGE_SIZE", default_value = "100")]
    pub page_size: u32,

    /// Cap on a single copy buy (USDC)
    #[arg(long, env = "MAX_TRADE_NOTIONAL")]
    pub max_trade_notional: Option<Decimal>,

    /// Cap on a single copy buy as a fraction of balance (0.0 to 1.0)
    #[arg(long, env = "MAX_CONCENTRATION")]
    pub max_concentration: Option<Decimal>,

    /// Skip buys when the bid/ask spread exceeds this fraction of the best ask
    #[arg(long, env = "MAX_SPREAD")]
    pub max_spread: Option<Decimal>,

    /// Skip buys when either side of the book holds less than this (USDC)
    #[arg(long, env = "MIN_LIQUIDITY")]
    pub min_liquidity: Option<Decimal>,

    /// Log orders instead of submitting them
    #[arg(long)]
    pub dry_run: bool,
}

/// Signing key and CLOB API credentials for live trading.
#[derive(Clone)]
pub struct LiveCredentials {
    pub private_key: String,
    pub api: ApiCredentials,
}

impl fmt::Debug for LiveCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCredentials")
            .field("private_key", &"<redacted>")
            .field("api", &self.api)
            .finish()
    }
}

/// Validated configuration for the copy loops.
#[derive(Debug, Clone)]
pub struct CopyConfig {
    pub target_wallet: String,
    pub follower_wallet: String,
    /// Absent only in dry-run mode.
    pub credentials: Option<LiveCredentials>,
    pub clob_url: String,
    pub data_api_url: String,
    pub rpc_url: String,
    pub usdc_contract: String,
    pub chain_id: u64,
    pub signature_type: SignatureType,
    pub fetch_interval: Duration,
    pub staleness_window_secs: i64,
    pub retry_limit: u32,
    pub request_timeout: Duration,
    pub executor_interval: Duration,
    pub page_size: u32,
    pub sizing: SizingConfig,
    pub risk: RiskLimits,
    pub dry_run: bool,
}

impl RunArgs {
    /// Check every setting. Any failure is fatal.
    pub fn validate(self) -> Result<CopyConfig, CopyError> {
        let target = parse_wallet("target wallet (USER_ADDRESS)", self.target_wallet.as_deref())?;
        let follower = parse_wallet("follower wallet (PROXY_WALLET)", self.follower_wallet.as_deref())?;
        if target == follower {
            return Err(CopyError::Config(
                "target and follower wallets must differ".to_string(),
            ));
        }

        parse_address("USDC contract", &self.usdc_contract)?;

        if self.retry_limit == 0 {
            return Err(CopyError::Config("RETRY_LIMIT must be at least 1".to_string()));
        }
        positive("FETCH_INTERVAL", self.fetch_interval)?;
        positive("REQUEST_TIMEOUT", self.request_timeout)?;
        positive("EXECUTOR_INTERVAL", self.executor_interval)?;
        if self.too_old_timestamp <= 0 {
            return Err(CopyError::Config("TOO_OLD_TIMESTAMP must be positive".to_string()));
        }
        if self.page_size == 0 {
            return Err(CopyError::Config("ACTIVITY_PAGE_SIZE must be positive".to_string()));
        }

        let signature_type = SignatureType::try_from(self.signature_type)
            .map_err(|e| CopyError::Config(e.to_string()))?;
        let risk = self.risk_limits()?;

        let credentials = if self.dry_run {
            None
        } else {
            Some(self.live_credentials()?)
        };

        Ok(CopyConfig {
            target_wallet: wallet_key(&self.target_wallet.unwrap_or_default()),
            follower_wallet: wallet_key(&self.follower_wallet.unwrap_or_default()),
            credentials,
            clob_url: self.clob_url,
            data_api_url: self.data_api_url,
            rpc_url: self.rpc_url,
            usdc_contract: self.usdc_contract,
            chain_id: self.chain_id,
            signature_type,
            fetch_interval: Duration::from_secs(self.fetch_interval),
            staleness_window_secs: self.too_old_timestamp,
            retry_limit: self.retry_limit,
            request_timeout: Duration::from_secs(self.request_timeout),
            executor_interval: Duration::from_secs(self.executor_interval),
            page_size: self.page_size,
            sizing: SizingConfig::default(),
            risk,
            dry_run: self.dry_run,
        })
    }

    fn risk_limits(&self) -> Result<RiskLimits, CopyError> {
        if let Some(max) = self.max_trade_notional {
            if max <= Decimal::ZERO {
                return Err(CopyError::Config("MAX_TRADE_NOTIONAL must be positive".to_string()));
            }
        }
        if let Some(fraction) = self.max_concentration {
            if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                return Err(CopyError::Config(
                    "MAX_CONCENTRATION must be in (0, 1]".to_string(),
                ));
            }
        }

        if let Some(spread) = self.max_spread {
            if spread <= Decimal::ZERO || spread > Decimal::ONE {
                return Err(CopyError::Config("MAX_SPREAD must be in (0, 1]".to_string()));
            }
        }
        if let Some(min) = self.min_liquidity {
            if min <= Decimal::ZERO {
                return Err(CopyError::Config("MIN_LIQUIDITY must be positive".to_string()));
            }
        }

        Ok(RiskLimits {
            max_trade_notional: self.max_trade_notional,
            max_concentration: self.max_concentration,
            max_spread: self.max_spread,
            min_liquidity: self.min_liquidity,
        })
    }

    fn live_credentials(&self) -> Result<LiveCredentials, CopyError> {
        let private_key = required("PK", &self.private_key)?;
        let key = private_key.strip_prefix("0x").unwrap_or(private_key);
        PrivateKeySigner::from_str(key)
            .map_err(|_| CopyError::Config("PK is not a valid private key".to_string()))?;

        let api = ApiCredentials::new(
            required("CLOB_API_KEY", &self.clob_api_key)?,
            required("CLOB_SECRET", &self.clob_secret)?,
            required("CLOB_PASS_PHRASE", &self.clob_passphrase)?,
        );

        Ok(LiveCredentials {
            private_key: private_key.to_string(),
            api,
        })
    }
}

fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, CopyError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CopyError::Config(format!("{} is required for live trading", name))),
    }
}

fn positive(name: &str, value: u64) -> Result<(), CopyError> {
    if value == 0 {
        return Err(CopyError::Config(format!("{} must be positive", name)));
    }
    Ok(())
}

fn parse_wallet(label: &str, value: Option<&str>) -> Result<Address, CopyError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => parse_address(label, v),
        _ => Err(CopyError::Config(format!("{} is required", label))),
    }
}

fn parse_address(label: &str, value: &str) -> Result<Address, CopyError> {
    if !value.starts_with("0x") || value.len() != 42 {
        return Err(CopyError::Config(format!(
            "{} is not a 0x-prefixed 20-byte address: {}",
            label, value
        )));
    }
    Address::from_str(value)
        .map_err(|_| CopyError::Config(format!("{} is not a valid address: {}", label, value)))
}

fn redact(value: Option<&str>) -> &'static str {
    match value {
        Some(_) => "<redacted>",
        None => "<not set>",
    }
}

fn limit(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "off".to_string())
}

impl fmt::Display for CopyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let creds = self.credentials.as_ref();

        writeln!(f, "=== Wallets ===")?;
        writeln!(f, "  Target:               {}", self.target_wallet)?;
        writeln!(f, "  Follower:             {}", self.follower_wallet)?;
        writeln!(f, "  Mode:                 {}", if self.dry_run { "DRY RUN" } else { "LIVE" })?;

        writeln!(f, "\n=== Endpoints ===")?;
        writeln!(f, "  CLOB:                 {}", self.clob_url)?;
        writeln!(f, "  Data API:             {}", self.data_api_url)?;
        writeln!(f, "  RPC:                  {}", self.rpc_url)?;
        writeln!(f, "  USDC Contract:        {}", self.usdc_contract)?;
        writeln!(f, "  Chain ID:             {}", self.chain_id)?;
        writeln!(f, "  Signature Type:       {}", self.signature_type as u8)?;

        writeln!(f, "\n=== Credentials ===")?;
        writeln!(f, "  Private Key:          {}", redact(creds.map(|c| c.private_key.as_str())))?;
        writeln!(f, "  API Key:              {}", redact(creds.map(|c| c.api.api_key.as_str())))?;
        writeln!(f, "  API Secret:           {}", redact(creds.map(|c| c.api.api_secret.as_str())))?;
        writeln!(f, "  Passphrase:           {}", redact(creds.map(|c| c.api.passphrase.as_str())))?;

        writeln!(f, "\n=== Loops ===")?;
        writeln!(f, "  Fetch Interval:       {}s", self.fetch_interval.as_secs())?;
        writeln!(f, "  Executor Interval:    {}s", self.executor_interval.as_secs())?;
        writeln!(f, "  Staleness Window:     {}s", self.staleness_window_secs)?;
        writeln!(f, "  Page Size:            {}", self.page_size)?;
        writeln!(f, "  Retry Limit:          {}", self.retry_limit)?;
        writeln!(f, "  Request Timeout:      {}s", self.request_timeout.as_secs())?;

        writeln!(f, "\n=== Sizing ===")?;
        writeln!(f, "  Min Balance:          ${}", self.sizing.min_balance)?;
        writeln!(f, "  Dust Floor:           ${}", self.sizing.dust_floor)?;
        writeln!(f, "  Max Price Drift:      {}%", self.sizing.max_price_drift * Decimal::ONE_HUNDRED)?;
        writeln!(f, "  Sell Buffer:          {}", self.sizing.sell_buffer)?;
        writeln!(f, "  Min Sell Size:        {}", self.sizing.min_sell_size)?;
        writeln!(f, "  Balance Retry Factor: {}", self.sizing.balance_retry_factor)?;

        writeln!(f, "\n=== Risk Limits ===")?;
        writeln!(f, "  Max Trade Notional:   {}", limit(self.risk.max_trade_notional))?;
        writeln!(f, "  Max Concentration:    {}", limit(self.risk.max_concentration))?;
        writeln!(f, "  Max Spread:           {}", limit(self.risk.max_spread))?;
        write!(f, "  Min Liquidity:        {}", limit(self.risk.min_liquidity))
    }
}
