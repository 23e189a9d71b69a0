use crate::config::GlobalConfig;
use crate::scrapers::traits::OfferSource;
use crate::scrapers::types::{CardResponse, Offer, RawPricePoint, SearchResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Client for the Yandex Realty mobile API.
///
/// Requests impersonate the mobile app through fixed headers. When a proxy
/// pool is configured one client is pre-built per proxy (reqwest binds the
/// proxy at client construction) and every request picks one at random.
pub struct YandexApi {
    clients: Vec<Client>,
    search_url: String,
    card_url: String,
}

impl YandexApi {
    pub fn new(cfg: &GlobalConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&cfg.user_agent).context("invalid user agent")?,
        );
        headers.insert(
            "x-authorization",
            HeaderValue::from_str(&cfg.auth_token).context("invalid auth token")?,
        );

        let clients = if cfg.proxy.enabled && !cfg.proxy.list.is_empty() {
            cfg.proxy
                .list
                .iter()
                .map(|proxy_url| {
                    let proxy = Proxy::all(proxy_url)
                        .with_context(|| format!("invalid proxy url: {proxy_url}"))?;
                    build_client(&headers, Some(proxy))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![build_client(&headers, None)?]
        };

        Ok(Self {
            clients,
            search_url: cfg.api_url.clone(),
            card_url: cfg.card_url.clone(),
        })
    }

    fn pick_client(&self) -> &Client {
        &self.clients[fastrand::usize(..self.clients.len())]
    }
}

fn build_client(headers: &HeaderMap, proxy: Option<Proxy>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .default_headers(headers.clone());

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }

    builder.build().context("failed to create HTTP client")
}

#[async_trait]
impl OfferSource for YandexApi {
    async fn search(&self, query: &[(String, String)]) -> Result<Vec<Offer>> {
        let response = self
            .pick_client()
            .get(&self.search_url)
            .query(query)
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search request rejected")?;

        let parsed: SearchResponse = response
            .json()
            .await
            .context("malformed search response body")?;

        Ok(parsed.into_offers())
    }

    async fn price_timeline(&self, offer_id: &str) -> Result<Vec<RawPricePoint>> {
        let response = self
            .pick_client()
            .get(&self.card_url)
            .query(&[("id", offer_id)])
            .send()
            .await
            .context("card request failed")?
            .error_for_status()
            .context("card request rejected")?;

        let parsed: CardResponse = response
            .json()
            .await
            .context("malformed card response body")?;

        Ok(parsed.into_prices())
    }

    fn source_name(&self) -> &'static str {
        "yandex-realty"
    }
}
