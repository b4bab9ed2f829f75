// src/connectors/kraken.rs
use crate::config::Allocation;
use crate::connectors::error::KrakenError;
use crate::connectors::messages::{
    AccountBalance, KrakenResponse, OpenOrders, ServerTime, TickerInfo, TradeBalance,
};
use crate::connectors::nonce::NonceSource;
use crate::connectors::signature::{sign, NONCE_FIELD};
use crate::connectors::traits::{AccountApi, MarketData};
use crate::credentials::Credentials;
use crate::types::PriceSnapshot;
use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct KrakenClient {
    credentials: Credentials,
    http_client: Client,
    base_url: Url,
    nonces: NonceSource,
}

impl KrakenClient {
    pub fn new(
        credentials: Credentials,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, KrakenError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            credentials,
            http_client,
            base_url: Url::parse(base_url)?,
            nonces: NonceSource::new(),
        })
    }

    /// Signed POST to `/0/private/{endpoint}`. A fresh nonce replaces any caller-supplied one.
    pub async fn call_private<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, KrakenError> {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .filter(|(key, _)| key != NONCE_FIELD)
            .collect();
        params.insert(0, (NONCE_FIELD.to_string(), self.nonces.next().to_string()));

        let path = format!("/0/private/{}", endpoint);
        let signature = sign(&path, &params, self.credentials.secret())?;
        let body = serde_urlencoded::to_string(&params)?;
        let url = self.base_url.join(&path)?;

        debug!("POST {}", path);
        let response = self
            .http_client
            .post(url)
            .header("API-Key", self.credentials.api_key())
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        read_envelope(response).await
    }

    /// Unauthenticated GET to `/0/public/{endpoint}` with query parameters.
    pub async fn call_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, KrakenError> {
        let path = format!("/0/public/{}", endpoint);
        let url = self.base_url.join(&path)?;

        debug!("GET {} {:?}", path, query);
        let response = self.http_client.get(url).query(query).send().await?;

        read_envelope(response).await
    }

    pub async fn ticker_price(&self, pair: &str) -> Result<Decimal, KrakenError> {
        let tickers: HashMap<String, TickerInfo> =
            self.call_public("Ticker", &[("pair", pair)]).await?;

        // The venue answers with its own canonical pair name (XBTUSD -> XXBTZUSD).
        let info = tickers
            .into_values()
            .next()
            .ok_or_else(|| KrakenError::Parse(format!("no ticker returned for {}", pair)))?;
        let price = info
            .last_trade
            .first()
            .ok_or_else(|| KrakenError::Parse(format!("ticker for {} has no last trade", pair)))?;

        Decimal::from_str(price)
            .map_err(|e| KrakenError::Parse(format!("bad price `{}` for {}: {}", price, pair, e)))
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, KrakenError> {
    let status = response.status();
    let body = response.text().await?;
    parse_envelope(status, &body)
}

/// Error list first, then `result`. A body that is not an envelope at all is a
/// parse failure, or a status failure when the HTTP status was already non-2xx.
pub fn parse_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, KrakenError> {
    let envelope: KrakenResponse = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => return Err(KrakenError::Status(status)),
        Err(e) => return Err(e.into()),
    };

    if !envelope.error.is_empty() {
        return Err(KrakenError::Api(envelope.error));
    }

    let result = envelope
        .result
        .ok_or_else(|| KrakenError::Parse("response carries no `result`".to_string()))?;
    Ok(serde_json::from_value(result)?)
}

#[async_trait]
impl MarketData for KrakenClient {
    async fn fetch_prices(&self, allocations: &[Allocation]) -> anyhow::Result<PriceSnapshot> {
        let quotes = try_join_all(allocations.iter().map(|allocation| async move {
            let price = self
                .ticker_price(&allocation.pair)
                .await
                .with_context(|| format!("fetching {} price", allocation.pair))?;
            Ok::<_, anyhow::Error>((allocation.asset.clone(), price))
        }))
        .await?;

        Ok(quotes.into_iter().collect())
    }
}

#[async_trait]
impl AccountApi for KrakenClient {
    async fn server_time(&self) -> anyhow::Result<ServerTime> {
        Ok(self.call_public("Time", &[]).await?)
    }

    async fn balance(&self) -> anyhow::Result<AccountBalance> {
        Ok(self.call_private("Balance", Vec::new()).await?)
    }

    async fn trade_balance(&self) -> anyhow::Result<TradeBalance> {
        Ok(self.call_private("TradeBalance", Vec::new()).await?)
    }

    async fn open_orders(&self) -> anyhow::Result<OpenOrders> {
        Ok(self.call_private("OpenOrders", Vec::new()).await?)
    }
}
