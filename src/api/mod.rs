// SPDX-License-Identifier: GPL-3.0-only

//! Panel backend REST client

use crate::constants::api;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, info};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },
    #[error("Not logged in")]
    Unauthenticated,
}

#[derive(Debug, Clone, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Tokens issued by `POST /login/`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Answer of the PPID lookup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelCheck {
    pub exists: bool,
    #[serde(default)]
    pub recommended_ppid: Option<String>,
}

/// One image of a panel record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelImage {
    pub pattern_name: String,
    /// `None` when the upload failed and approval allowed it
    pub image_url: Option<String>,
}

/// Body of `POST /data/display-panel/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelRecord {
    pub ppid: String,
    pub panel_images: Vec<PanelImage>,
    pub defects: Vec<String>,
    pub test_type: String,
}

/// Response of record creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPanel {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Inference task, poll with [`ApiClient::task_status`]
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Client for the panel backend
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api::REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::RequestBuilder> {
        let token = self.token.as_ref().ok_or(ApiError::Unauthenticated)?;
        Ok(request.bearer_auth(token))
    }

    async fn decode<T: DeserializeOwned>(
        method: &'static str,
        path: &str,
        response: reqwest::Response,
    ) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        debug!(method, path, status = status.as_u16(), "API call succeeded");
        Ok(response.json().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let request = self.authorized(self.client.post(self.url(path)).json(body))?;
        Self::decode("POST", path, request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let request = self.authorized(self.client.get(self.url(path)))?;
        Self::decode("GET", path, request.send().await?).await
    }

    /// `POST /login/`; keeps the access token for later calls
    pub async fn login(&mut self, username: &str, password: &str) -> ApiResult<LoginResponse> {
        let path = "/login/";
        let response = self
            .client
            .post(self.url(path))
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let tokens: LoginResponse = Self::decode("POST", path, response).await?;
        self.token = Some(tokens.access.clone());
        info!(username, "Logged in");
        Ok(tokens)
    }

    /// Whether a PPID already has a record, plus the suggested next PPID
    pub async fn check_panel(&self, ppid: &str) -> ApiResult<PanelCheck> {
        self.post(
            "/data/display-panel/check_display_panel/",
            &serde_json::json!({ "ppid": ppid }),
        )
        .await
    }

    pub async fn create_panel(&self, record: &PanelRecord) -> ApiResult<CreatedPanel> {
        info!(ppid = %record.ppid, images = record.panel_images.len(), "Creating panel record");
        self.post("/data/display-panel/", record).await
    }

    pub async fn task_status(&self, task_id: &str) -> ApiResult<serde_json::Value> {
        self.get(&format!("/data/task/{}/status/", task_id)).await
    }

    pub async fn image_stats(&self) -> ApiResult<serde_json::Value> {
        self.get("/data/panel-image-search/stats/").await
    }

    pub async fn submit_feedback(
        &self,
        panel_id: &str,
        feedback: &Feedback,
    ) -> ApiResult<serde_json::Value> {
        self.post(&format!("/data/panel/{}/feedback/", panel_id), feedback)
            .await
    }
}
