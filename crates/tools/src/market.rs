//! Market-data tools backed by the CoinGecko public API.
//!
//! The same [`MarketData`] client serves the `/price` command, which looks
//! prices up directly without involving the model.

use async_trait::async_trait;
use clawdvc_core::error::ToolError;
use clawdvc_core::tool::{Tool, ToolContext, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Price snapshot for one coin in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub coin_id: String,
    pub currency: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub last_updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMatch {
    pub id: String,
    pub name: String,
    pub symbol: String,
}

/// Market-data lookup. Unknown coins are simply absent from the result.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn prices(&self, coin_ids: &[String], currency: &str) -> Result<Vec<PriceSnapshot>, ToolError>;

    async fn search(&self, query: &str) -> Result<Vec<CoinMatch>, ToolError>;
}

pub struct CoinGeckoClient {
    base_url: String,
    client: reqwest::Client,
}

impl CoinGeckoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get_json(&self, tool_name: &str, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, ToolError> {
        let url = format!("{}{path}", self.base_url);
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: tool_name.into(),
            reason,
        };
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("market API returned {}", response.status())));
        }
        response.json().await.map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl MarketData for CoinGeckoClient {
    async fn prices(&self, coin_ids: &[String], currency: &str) -> Result<Vec<PriceSnapshot>, ToolError> {
        let ids = coin_ids.join(",");
        let currency = currency.to_lowercase();
        debug!(ids = %ids, currency = %currency, "Fetching prices");
        let data = self
            .get_json(
                "get_crypto_price",
                "/simple/price",
                &[
                    ("ids", &ids),
                    ("vs_currencies", &currency),
                    ("include_24hr_change", "true"),
                    ("include_24hr_vol", "true"),
                    ("include_market_cap", "true"),
                    ("include_last_updated_at", "true"),
                ],
            )
            .await?;
        Ok(parse_prices(&data, coin_ids, &currency))
    }

    async fn search(&self, query: &str) -> Result<Vec<CoinMatch>, ToolError> {
        let data = self.get_json("search_coin", "/search", &[("query", query)]).await?;
        Ok(parse_search(&data))
    }
}

/// Snapshots for `coin_ids` in request order, skipping unknown coins.
fn parse_prices(data: &serde_json::Value, coin_ids: &[String], currency: &str) -> Vec<PriceSnapshot> {
    coin_ids
        .iter()
        .filter_map(|id| {
            let info = data.get(id)?;
            Some(PriceSnapshot {
                coin_id: id.clone(),
                currency: currency.to_string(),
                price: info.get(currency)?.as_f64()?,
                change_24h: info.get(format!("{currency}_24h_change")).and_then(|v| v.as_f64()),
                volume_24h: info.get(format!("{currency}_24h_vol")).and_then(|v| v.as_f64()),
                market_cap: info.get(format!("{currency}_market_cap")).and_then(|v| v.as_f64()),
                last_updated_at: info.get("last_updated_at").and_then(|v| v.as_i64()),
            })
        })
        .collect()
}

fn parse_search(data: &serde_json::Value) -> Vec<CoinMatch> {
    data["coins"]
        .as_array()
        .map(|coins| {
            coins
                .iter()
                .take(5)
                .filter_map(|c| {
                    Some(CoinMatch {
                        id: c["id"].as_str()?.to_string(),
                        name: c["name"].as_str().unwrap_or_default().to_string(),
                        symbol: c["symbol"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split a user-supplied coin list ("bitcoin, eth solana") into ids.
pub fn parse_coin_list(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn format_snapshot(s: &PriceSnapshot) -> String {
    let cur = s.currency.to_uppercase();
    let mut lines = vec![
        format!("Coin: {}", s.coin_id),
        format!("Price: {} {cur}", s.price),
    ];
    if let Some(change) = s.change_24h {
        lines.push(format!("24h Change: {change:.2}%"));
    }
    if let Some(volume) = s.volume_24h {
        lines.push(format!("24h Volume: {volume:.0} {cur}"));
    }
    if let Some(cap) = s.market_cap {
        lines.push(format!("Market Cap: {cap:.0} {cur}"));
    }
    if let Some(updated) = s.last_updated_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
        lines.push(format!("Last Updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    lines.join("\n")
}

/// One line per coin, for multi-coin answers and the `/price` command.
pub fn format_price_lines(snapshots: &[PriceSnapshot]) -> String {
    if snapshots.is_empty() {
        return "No coins found.".into();
    }
    snapshots
        .iter()
        .map(|s| {
            let change = s
                .change_24h
                .map(|c| format!("{c:+.2}%"))
                .unwrap_or_else(|| "N/A".into());
            format!("{}: {} {} (24h: {change})", s.coin_id, s.price, s.currency.to_uppercase())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct GetCryptoPriceTool {
    market: Arc<dyn MarketData>,
}

impl GetCryptoPriceTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Tool for GetCryptoPriceTool {
    fn name(&self) -> &str {
        "get_crypto_price"
    }

    fn description(&self) -> &str {
        "Get the live price, 24h change, volume and market cap of a cryptocurrency by its CoinGecko id \
         (e.g. 'bitcoin', 'ethereum', 'solana'). Use search_coin first if unsure of the id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "coin_id": { "type": "string", "description": "CoinGecko coin id" },
                "currency": { "type": "string", "description": "Quote currency (default usd)" }
            },
            "required": ["coin_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let coin_id = arguments["coin_id"].as_str().unwrap_or_default().trim().to_lowercase();
        let currency = arguments["currency"].as_str().unwrap_or("usd");
        let snapshots = self.market.prices(std::slice::from_ref(&coin_id), currency).await?;
        match snapshots.first() {
            Some(snapshot) => Ok(ToolResult::ok(format_snapshot(snapshot))
                .with_data(serde_json::to_value(snapshot).unwrap_or_default())),
            None => Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Coin '{coin_id}' not found. Use search_coin to find the correct id."),
            }),
        }
    }
}

pub struct GetMultipleCryptoPricesTool {
    market: Arc<dyn MarketData>,
}

impl GetMultipleCryptoPricesTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Tool for GetMultipleCryptoPricesTool {
    fn name(&self) -> &str {
        "get_multiple_crypto_prices"
    }

    fn description(&self) -> &str {
        "Get live prices for several cryptocurrencies at once. Pass comma-separated CoinGecko ids."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "coin_ids": { "type": "string", "description": "Comma-separated ids, e.g. 'bitcoin,ethereum'" },
                "currency": { "type": "string", "description": "Quote currency (default usd)" }
            },
            "required": ["coin_ids"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let ids = parse_coin_list(arguments["coin_ids"].as_str().unwrap_or_default());
        if ids.is_empty() {
            return Err(ToolError::InvalidArguments("coin_ids is empty".into()));
        }
        let currency = arguments["currency"].as_str().unwrap_or("usd");
        let snapshots = self.market.prices(&ids, currency).await?;
        Ok(ToolResult::ok(format_price_lines(&snapshots))
            .with_data(serde_json::to_value(&snapshots).unwrap_or_default()))
    }
}

pub struct SearchCoinTool {
    market: Arc<dyn MarketData>,
}

impl SearchCoinTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Tool for SearchCoinTool {
    fn name(&self) -> &str {
        "search_coin"
    }

    fn description(&self) -> &str {
        "Find the CoinGecko id of a cryptocurrency by name or symbol."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Coin name or ticker symbol" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let matches = self.market.search(query).await?;
        if matches.is_empty() {
            return Ok(ToolResult::ok(format!("No coins found for '{query}'.")));
        }
        let lines: Vec<String> = matches
            .iter()
            .map(|c| format!("ID: {} | Name: {} | Symbol: {}", c.id, c.name, c.symbol))
            .collect();
        let by_symbol: BTreeMap<_, _> = matches.iter().map(|c| (c.symbol.clone(), c.id.clone())).collect();
        Ok(ToolResult::ok(lines.join("\n")).with_data(serde_json::json!({ "ids_by_symbol": by_symbol })))
    }
}
