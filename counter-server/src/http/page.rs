//! Entry page served at `/`.

use crate::config::HttpConfig;
use axum::response::Html;
use axum::Extension;
use std::sync::Arc;

const EMBEDDED_PAGE: &str = include_str!("../../static/index.html");

/// HTML for the browser client, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EntryPage {
    html: Arc<str>,
}

impl EntryPage {
    /// The page compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            html: Arc::from(EMBEDDED_PAGE),
        }
    }

    /// Load the configured override, or fall back to the embedded page.
    pub fn load(config: &HttpConfig) -> std::io::Result<Self> {
        match &config.static_page {
            Some(path) => {
                let html = std::fs::read_to_string(path)?;
                tracing::info!("Serving entry page from {}", path.display());
                Ok(Self {
                    html: Arc::from(html),
                })
            }
            None => Ok(Self::embedded()),
        }
    }

    /// Raw HTML.
    pub fn html(&self) -> &str {
        &self.html
    }
}

/// Entry page handler.
pub async fn page_handler(Extension(page): Extension<EntryPage>) -> Html<String> {
    Html(page.html().to_owned())
}
