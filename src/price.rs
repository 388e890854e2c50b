use async_trait::async_trait;
use serde::Deserialize;

use crate::types::WatchError;

/// Market data for a token, in USD.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenQuote {
    pub price_usd: f64,
    pub market_cap_usd: Option<f64>,
}

/// Best-effort token price lookup.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    async fn quote(&self, mint: &str) -> Result<TokenQuote, WatchError>;
}

const DEXSCREENER_TOKENS_URL: &str = "https://api.dexscreener.com/latest/dex/tokens/";

#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    chain_id: String,
    price_usd: Option<String>,
    market_cap: Option<f64>,
    fdv: Option<f64>,
    #[serde(default)]
    liquidity: Liquidity,
}

#[derive(Debug, Default, Deserialize)]
struct Liquidity {
    #[serde(default)]
    usd: f64,
}

/// Prices from the DexScreener public API, using the most liquid Solana pair.
pub struct DexScreenerPrices {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerPrices {
    pub fn new() -> Self {
        Self::with_base_url(DEXSCREENER_TOKENS_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DexScreenerPrices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for DexScreenerPrices {
    async fn quote(&self, mint: &str) -> Result<TokenQuote, WatchError> {
        let url = format!("{}{mint}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WatchError::Price(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WatchError::Price(format!("dexscreener returned {}", response.status())));
        }

        let body: TokensResponse = response
            .json()
            .await
            .map_err(|e| WatchError::Price(e.to_string()))?;

        best_quote(body.pairs.unwrap_or_default())
            .ok_or_else(|| WatchError::Price(format!("no priced solana pair for {mint}")))
    }
}

fn best_quote(pairs: Vec<Pair>) -> Option<TokenQuote> {
    pairs
        .into_iter()
        .filter(|pair| pair.chain_id == "solana")
        .filter_map(|pair| {
            let price_usd = pair.price_usd.as_deref()?.parse::<f64>().ok()?;
            let quote = TokenQuote {
                price_usd,
                market_cap_usd: pair.market_cap.or(pair.fdv),
            };
            Some((pair.liquidity.usd, quote))
        })
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, quote)| quote)
}
