//! Fetching remote knowledge over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::KnowledgeError;

/// A fetched web page or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Final URL after redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedDocument {
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(content_type) => content_type.contains("html"),
            None => self.body.trim_start().starts_with('<'),
        }
    }
}

#[async_trait]
pub trait KnowledgeFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, KnowledgeError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("promptforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl KnowledgeFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, KnowledgeError> {
        let fetch_error = |message: String| KnowledgeError::Fetch {
            source_name: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| fetch_error(e.to_string()))?;

        Ok(FetchedDocument {
            url: final_url,
            content_type,
            body,
        })
    }
}

/// Serves fixed pages and remembers which URLs were asked for.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticFetcher {
    pages: std::collections::HashMap<String, String>,
    requested: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl StaticFetcher {
    pub(crate) fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("fetcher lock poisoned").clone()
    }
}

#[cfg(test)]
#[async_trait]
impl KnowledgeFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, KnowledgeError> {
        self.requested.lock().expect("fetcher lock poisoned").push(url.to_string());
        match self.pages.get(url) {
            Some(body) => Ok(FetchedDocument {
                url: url.to_string(),
                content_type: Some("text/html".to_string()),
                body: body.clone(),
            }),
            None => Err(KnowledgeError::Fetch {
                source_name: url.to_string(),
                message: "HTTP 404".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_detection() {
        let doc = FetchedDocument {
            url: "u".into(),
            content_type: None,
            body: "  <html></html>".into(),
        };
        assert!(doc.is_html());
        let text = FetchedDocument {
            content_type: Some("text/plain".into()),
            ..doc
        };
        assert!(!text.is_html());
    }

    #[tokio::test]
    async fn test_http_fetch_failure_names_source() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2));
        let err = fetcher.fetch("http://127.0.0.1:9/missing").await.unwrap_err();
        match err {
            KnowledgeError::Fetch { source_name, .. } => assert_eq!(source_name, "http://127.0.0.1:9/missing"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
