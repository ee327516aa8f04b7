use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::{CreateItemRequest, RemoteItem, UpdateItemRequest};

/// What the server answered. Transport failures (no answer at all) are `Err(AppError::Transport)`
/// on the surrounding `AppResult`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    /// 2xx. `body` is `None` when the payload was empty or could not be parsed.
    Ok { status: u16, body: Option<T> },
    /// Non-2xx with the best available server message.
    Rejected { status: u16, message: String },
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Ok { .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiResponse::Ok { status, .. } | ApiResponse::Rejected { status, .. } => *status,
        }
    }

    /// Success body, `Ok(None)` for an empty success, `Err(Remote)` for a rejection.
    pub fn into_body(self) -> AppResult<Option<T>> {
        match self {
            ApiResponse::Ok { body, .. } => Ok(body),
            ApiResponse::Rejected { status, message } => Err(AppError::Remote { status, message }),
        }
    }
}

/// The inventory API's item endpoints. Every call needs a bearer token and fails with
/// `Unauthenticated` before touching the network when it is empty.
#[async_trait]
pub trait ItemApi: Send + Sync {
    async fn list(&self, token: &str) -> AppResult<ApiResponse<Vec<RemoteItem>>>;

    async fn create(
        &self,
        token: &str,
        request: &CreateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>>;

    async fn get(&self, token: &str, id: i64) -> AppResult<ApiResponse<RemoteItem>>;

    async fn update(
        &self,
        token: &str,
        id: i64,
        request: &UpdateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>>;

    async fn delete(&self, token: &str, id: i64) -> AppResult<ApiResponse<()>>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// reqwest-backed `ItemApi`.
#[derive(Clone)]
pub struct HttpItemApi {
    client: Client,
    base_url: String,
}

impl HttpItemApi {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn items_url(&self) -> String {
        format!("{}/items", self.base_url)
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/items/{}", self.base_url, id)
    }

    fn request(&self, method: Method, url: String, token: &str) -> AppResult<RequestBuilder> {
        if token.is_empty() {
            return Err(AppError::Unauthenticated);
        }
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> AppResult<ApiResponse<T>> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(Self::rejected(status, response).await);
        }

        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => Some(body),
                Err(e) => {
                    tracing::warn!("Unparseable response body (status {}): {}", status, e);
                    None
                }
            }
        };
        Ok(ApiResponse::Ok {
            status: status.as_u16(),
            body,
        })
    }

    async fn rejected<T>(status: StatusCode, response: Response) -> ApiResponse<T> {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or(text);

        tracing::debug!("Item API rejected request: {} - {}", status.as_u16(), message);
        ApiResponse::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ItemApi for HttpItemApi {
    async fn list(&self, token: &str) -> AppResult<ApiResponse<Vec<RemoteItem>>> {
        let request = self.request(Method::GET, self.items_url(), token)?;
        self.send_json(request).await
    }

    async fn create(
        &self,
        token: &str,
        request: &CreateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>> {
        let builder = self
            .request(Method::POST, self.items_url(), token)?
            .json(request);
        self.send_json(builder).await
    }

    async fn get(&self, token: &str, id: i64) -> AppResult<ApiResponse<RemoteItem>> {
        let request = self.request(Method::GET, self.item_url(id), token)?;
        self.send_json(request).await
    }

    async fn update(
        &self,
        token: &str,
        id: i64,
        request: &UpdateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>> {
        let builder = self
            .request(Method::PUT, self.item_url(id), token)?
            .json(request);
        self.send_json(builder).await
    }

    async fn delete(&self, token: &str, id: i64) -> AppResult<ApiResponse<()>> {
        let response = self
            .request(Method::DELETE, self.item_url(id), token)?
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(Self::rejected(status, response).await);
        }
        Ok(ApiResponse::Ok {
            status: status.as_u16(),
            body: Some(()),
        })
    }
}
