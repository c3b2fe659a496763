//! Browser seam for the DOM path.
//!
//! A [`BrowserPage`] is whatever renders the form: a headless Chrome tab,
//! a WebDriver session, or [`HttpPage`], which fetches the markup with
//! `reqwest` and runs no scripts. Callers construct the page once and pass
//! it in; the library never launches a browser itself.

use crate::error::FormsError;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait until the page has settled.
    async fn goto(&self, url: &str) -> Result<(), FormsError>;

    /// Serialized DOM of the current page.
    async fn html(&self) -> Result<String, FormsError>;

    /// PNG screenshot of the full page.
    async fn screenshot(&self) -> Result<Vec<u8>, FormsError>;
}

/// Script-less page: `goto` downloads the document, `html` returns it.
pub struct HttpPage {
    client: reqwest::Client,
    document: Mutex<Option<String>>,
}

impl HttpPage {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            document: Mutex::new(None),
        }
    }
}

impl Default for HttpPage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserPage for HttpPage {
    async fn goto(&self, url: &str) -> Result<(), FormsError> {
        let fail = |detail: String| FormsError::BrowserError {
            action: "navigating",
            detail,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fail(format!("HTTP {} for {}", resp.status(), url)));
        }
        let body = resp.text().await.map_err(|e| fail(e.to_string()))?;
        debug!("Loaded {} ({} bytes)", url, body.len());
        *self.document.lock().await = Some(body);
        Ok(())
    }

    async fn html(&self) -> Result<String, FormsError> {
        self.document
            .lock()
            .await
            .clone()
            .ok_or_else(|| FormsError::BrowserError {
                action: "reading the DOM",
                detail: "no page loaded".to_string(),
            })
    }

    async fn screenshot(&self) -> Result<Vec<u8>, FormsError> {
        Err(FormsError::BrowserError {
            action: "taking a screenshot",
            detail: "HttpPage does not render pages".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn html_before_goto_is_an_error() {
        let page = HttpPage::new();
        let err = page.html().await.unwrap_err();
        assert!(err.to_string().contains("no page loaded"), "{err}");
        assert!(page.screenshot().await.is_err());
    }
}
