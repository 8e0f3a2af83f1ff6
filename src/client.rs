//! HTTP access to the registry, behind the `RegistrySource` seam so the
//! crawler can run against an in-memory fake in tests.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::warn;
use url::Url;

pub const BASE_URL: &str = "https://maharerait.mahaonline.gov.in/";
const PRE_QUERY_URL: &str = "https://maharerait.mahaonline.gov.in/searchlist/search?MenuID=1069";
const GET_DISTRICT_URL: &str = "https://maharerait.mahaonline.gov.in/SearchList/GetDistrict";
const SEARCH_URL: &str = "https://maharerait.mahaonline.gov.in/SearchList/Search";
const SHOW_CERTIFICATE_URL: &str = "https://maharerait.mahaonline.gov.in/SearchList/ShowCertificate";

pub const MAHARASHTRA_DIVISION_ID: i64 = 27;

const MAX_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(60);

static TOKEN_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="__RequestVerificationToken"]"#).unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct District {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Text")]
    pub name: String,
}

/// External collaborators of the crawl: district enumeration, results pages,
/// detail pages and certificate payloads, all as raw text.
#[async_trait]
pub trait RegistrySource {
    async fn districts(&self) -> Result<Vec<District>>;
    async fn results_page(&self, district: &District, page: i32) -> Result<String>;
    async fn detail_page(&self, href: &str) -> Result<String>;
    /// Base64 PDF payload for a certificate query string.
    async fn certificate(&self, qstr: &str) -> Result<String>;
}

pub struct HttpRegistry {
    client: reqwest::Client,
    token: String,
}

impl HttpRegistry {
    /// Build the client and bootstrap the verification token from the
    /// search page; the token is required on every search POST.
    pub async fn connect() -> Result<Self> {
        let client = build_client()?;
        let mut registry = Self {
            client,
            token: String::new(),
        };
        let html = registry
            .send_with_retry(registry.client.get(PRE_QUERY_URL))
            .await?;
        registry.token =
            verification_token(&html).context("no verification token on the search page")?;
        Ok(registry)
    }

    /// Bounded retry on timeout/connection failures with a fixed delay; any
    /// other error, or exhausting the budget, is a hard failure for the call.
    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let mut attempt = 0;
        loop {
            let builder = request
                .try_clone()
                .context("request body is not replayable")?;
            match builder.send().await {
                Ok(response) => return Ok(response.error_for_status()?.text().await?),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    warn!(
                        "request failed ({e}); retrying in {}s ({attempt}/{MAX_ATTEMPTS})",
                        RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl RegistrySource for HttpRegistry {
    async fn districts(&self) -> Result<Vec<District>> {
        let body = self
            .send_with_retry(
                self.client
                    .post(GET_DISTRICT_URL)
                    .form(&[("DivID", MAHARASHTRA_DIVISION_ID.to_string())]),
            )
            .await?;
        serde_json::from_str(&body).context("district list is not valid JSON")
    }

    async fn results_page(&self, district: &District, page: i32) -> Result<String> {
        let form = [
            ("__RequestVerificationToken", self.token.clone()),
            ("DivisionID", MAHARASHTRA_DIVISION_ID.to_string()),
            ("DistrictID", district.id.to_string()),
            ("PageNo", page.to_string()),
        ];
        self.send_with_retry(self.client.post(SEARCH_URL).form(&form))
            .await
    }

    async fn detail_page(&self, href: &str) -> Result<String> {
        let url = Url::parse(BASE_URL)?
            .join(href)
            .with_context(|| format!("bad detail link '{href}'"))?;
        self.send_with_retry(self.client.get(url)).await
    }

    async fn certificate(&self, qstr: &str) -> Result<String> {
        self.send_with_retry(
            self.client
                .post(SHOW_CERTIFICATE_URL)
                .form(&[("ID", qstr)]),
        )
        .await
    }
}

fn build_client() -> Result<reqwest::Client> {
    // Browser-like headers; the registry rejects bare clients.
    let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                      (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,hi;q=0.8"),
    );
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );

    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .build()
        .context("failed to build HTTP client")
}

fn verification_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&TOKEN_SEL)
        .next()
        .and_then(|input| input.attr("value"))
        .map(str::to_string)
}
