//! Graph API client over `reqwest`.
//!
//! GETs are retried on 5xx a couple of times before counting as failures.
//! Reply POSTs are never retried: a 5xx may still have published the reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::graph::api::{Comment, PageApi, Post};

/// Tracing target for the reply audit log.
pub const REPLY_LOG_TARGET: &str = "page_autoreply::replies";

/// Total attempts for a GET that keeps returning 5xx.
const MAX_GET_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(500);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// Graph API client for one page.
pub struct GraphClient {
    config: GraphConfig,
    client: reqwest::Client,
}

impl GraphClient {
    pub fn new(config: GraphConfig) -> Result<Self, GraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (compatible; AutoResponseBot/1.0)"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GraphError::RequestFailed {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> [(&'static str, &str); 1] {
        [("access_token", self.config.access_token.expose_secret())]
    }

    /// Send a request built by `build`, retrying on 5xx.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<reqwest::Response, GraphError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let resp = build().send().await.map_err(|e| GraphError::RequestFailed {
                url: redact(url),
                reason: e.without_url().to_string(),
            })?;

            if !resp.status().is_server_error() || attempt >= MAX_GET_ATTEMPTS {
                return Ok(resp);
            }

            warn!(
                url = %redact(url),
                status = resp.status().as_u16(),
                attempt,
                "Server error, retrying"
            );
            attempt += 1;
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<GraphPage<T>, GraphError> {
        let resp = self
            .send_with_retry(url, || self.client.get(url).query(&self.token()))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GraphError::Status {
                url: redact(url),
                status: status.as_u16(),
            });
        }

        resp.json::<GraphPage<T>>()
            .await
            .map_err(|e| GraphError::InvalidResponse {
                url: redact(url),
                reason: e.without_url().to_string(),
            })
    }

    /// Follow `paging.next` from `first_url` until exhausted.
    ///
    /// A failing first page is an error; a later failure keeps what was
    /// already fetched.
    async fn fetch_all<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, GraphError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            match self.get_page::<T>(&url).await {
                Ok(page) => {
                    pages += 1;
                    items.extend(page.data);
                    next = page.paging.and_then(|p| p.next);
                }
                Err(e) if pages == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        pages,
                        items = items.len(),
                        error = %e,
                        "Pagination failed, keeping partial results"
                    );
                    break;
                }
            }
        }

        debug!(pages, items = items.len(), "Pagination complete");
        Ok(items)
    }
}

#[async_trait]
impl PageApi for GraphClient {
    async fn fetch_posts(&self) -> Result<Vec<Post>, GraphError> {
        let url = self.url(&format!(
            "{}/posts?fields=id,message&limit={}",
            self.config.page_id, self.config.post_page_limit
        ));
        self.fetch_all(url).await
    }

    async fn fetch_comments(&self, post_id: &str) -> Result<Vec<Comment>, GraphError> {
        let url = self.url(&format!(
            "{post_id}/comments?fields=id,message,from&limit={}",
            self.config.comment_page_limit
        ));
        self.fetch_all(url).await
    }

    async fn reply(&self, comment_id: &str, message: &str) -> Result<bool, GraphError> {
        if message.trim().is_empty() {
            return Ok(false);
        }

        let url = self.url(&format!("{comment_id}/comments"));
        let resp = self
            .client
            .post(&url)
            .query(&self.token())
            .form(&[("message", message)])
            .send()
            .await
            .map_err(|e| GraphError::RequestFailed {
                url: redact(&url),
                reason: e.without_url().to_string(),
            })?;

        if resp.status() == StatusCode::OK {
            info!(target: REPLY_LOG_TARGET, "Replied to {comment_id}: {message}");
            info!(comment_id, "Replied successfully");
            Ok(true)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(comment_id, status, body = %truncate(&body, 200), "Reply rejected");
            Ok(false)
        }
    }
}

/// Strip the query string so tokens never reach logs or errors.
fn redact(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
