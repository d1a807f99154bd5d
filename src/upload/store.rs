// SPDX-License-Identifier: GPL-3.0-only

//! Object stores frames are uploaded to

use super::{UploadError, UploadResult};
use crate::constants::{api, upload};
use crate::pipelines::photo::encoding::save_png;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Destination of uploaded PNGs
pub trait ObjectStore: Send + Sync {
    /// Store `png` under `key` and return its public URL
    fn put<'a>(&'a self, key: &'a str, png: Arc<[u8]>) -> BoxFuture<'a, UploadResult<String>>;

    fn name(&self) -> &'static str;
}

/// S3-style HTTP object storage
///
/// Objects are written with `PUT {base}/{key}` and served from the same URL.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, token: Option<String>) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api::REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

impl ObjectStore for HttpObjectStore {
    fn put<'a>(&'a self, key: &'a str, png: Arc<[u8]>) -> BoxFuture<'a, UploadResult<String>> {
        Box::pin(async move {
            let url = self.url_for(key);
            let mut request = self
                .client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, upload::CONTENT_TYPE)
                .body(png.to_vec());
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(UploadError::Status {
                    status: status.as_u16(),
                    key: key.to_string(),
                });
            }

            debug!(%url, bytes = png.len(), "Object stored");
            Ok(url)
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Writes objects below a local directory
///
/// Used for test sessions saved to disk.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for LocalObjectStore {
    fn put<'a>(&'a self, key: &'a str, png: Arc<[u8]>) -> BoxFuture<'a, UploadResult<String>> {
        Box::pin(async move {
            let relative = Path::new(key);
            let filename = relative
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| UploadError::InvalidKey(key.to_string()))?;
            let dir = match relative.parent() {
                Some(parent) => self.root.join(parent),
                None => self.root.clone(),
            };

            let path = save_png(png, &dir, filename)
                .await
                .map_err(UploadError::Local)?;
            Ok(format!("file://{}", path.display()))
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_writes_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let url = store
            .put("test-images/P1_white_1700000000000.png", Arc::from(vec![1u8, 2, 3]))
            .await
            .unwrap();

        let expected = dir.path().join("test-images").join("P1_white_1700000000000.png");
        assert_eq!(url, format!("file://{}", expected.display()));
        assert_eq!(std::fs::read(expected).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_http_store_url_has_single_slash() {
        let store = HttpObjectStore::new("https://storage.example/", None).unwrap();
        assert_eq!(
            store.url_for("production-images/a.png"),
            "https://storage.example/production-images/a.png"
        );
    }
}
