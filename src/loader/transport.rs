//! Fetch seam.
//!
//! The loader talks to the outside world through [`Transport`]: a plain GET
//! returning a text body plus the URL the request actually resolved to
//! (redirects included, which is where version tokens come from). The
//! default transport serves `http(s)` targets over the network and treats
//! everything else as a file path, so locally-served graphs work without a
//! web server in between.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::importer::diagnostics::{ImportError, ImportResult};

#[derive(Debug, Clone)]
pub struct FetchedText {
    pub body: String,
    pub resolved_url: String,
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = ImportResult<FetchedText>> + Send + 'a>>;

pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, target: &'a str) -> FetchFuture<'a>;
}

pub struct DefaultTransport {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
}

impl DefaultTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_dir: None,
        }
    }

    /// Root-relative canonical paths resolve under this directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn local_path(&self, target: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(target.trim_start_matches('/')),
            None => PathBuf::from(target),
        }
    }

    async fn get_remote(&self, target: &str) -> ImportResult<FetchedText> {
        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| ImportError::fetch_failed(target, e.to_string()))?;
        if !response.status().is_success() {
            return Err(ImportError::fetch_failed(
                target,
                format!("HTTP {}", response.status()),
            ));
        }
        let resolved_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ImportError::fetch_failed(target, e.to_string()))?;
        Ok(FetchedText { body, resolved_url })
    }

    async fn get_local(&self, target: &str) -> ImportResult<FetchedText> {
        let path = self.local_path(target);
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ImportError::io(&path.display().to_string(), e.to_string()))?;
        Ok(FetchedText {
            body,
            resolved_url: target.to_string(),
        })
    }
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DefaultTransport {
    fn get<'a>(&'a self, target: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            if target.starts_with("http://") || target.starts_with("https://") {
                self.get_remote(target).await
            } else {
                self.get_local(target).await
            }
        })
    }
}
