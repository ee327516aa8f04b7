//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::http_client::{ApiResponse, ItemApi};
use crate::models::{CreateItemRequest, RemoteItem, UpdateItemRequest};

/// Canned answer for one endpoint.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(Option<T>),
    Rejected(u16, &'static str),
    Transport,
}

impl<T> Reply<T> {
    fn into_result(self) -> AppResult<ApiResponse<T>> {
        match self {
            Reply::Ok(body) => Ok(ApiResponse::Ok { status: 200, body }),
            Reply::Rejected(status, message) => Ok(ApiResponse::Rejected {
                status,
                message: message.to_string(),
            }),
            Reply::Transport => Err(AppError::Transport("connection refused".to_string())),
        }
    }
}

/// One recorded call: endpoint name, target id, bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub id: Option<i64>,
    pub token: String,
}

/// Scripted `ItemApi` that records every call it receives.
pub struct FakeItemApi {
    calls: Mutex<Vec<Call>>,
    list: Mutex<Reply<Vec<RemoteItem>>>,
    create: Mutex<Reply<RemoteItem>>,
    get: Mutex<Reply<RemoteItem>>,
    update: Mutex<Reply<RemoteItem>>,
    delete: Mutex<Reply<()>>,
}

impl FakeItemApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            list: Mutex::new(Reply::Transport),
            create: Mutex::new(Reply::Transport),
            get: Mutex::new(Reply::Transport),
            update: Mutex::new(Reply::Transport),
            delete: Mutex::new(Reply::Transport),
        }
    }

    pub fn on_list(&self, reply: Reply<Vec<RemoteItem>>) {
        *self.list.lock().unwrap() = reply;
    }

    pub fn on_create(&self, reply: Reply<RemoteItem>) {
        *self.create.lock().unwrap() = reply;
    }

    pub fn on_get(&self, reply: Reply<RemoteItem>) {
        *self.get.lock().unwrap() = reply;
    }

    pub fn on_update(&self, reply: Reply<RemoteItem>) {
        *self.update.lock().unwrap() = reply;
    }

    pub fn on_delete(&self, reply: Reply<()>) {
        *self.delete.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, id: Option<i64>, token: &str) {
        self.calls.lock().unwrap().push(Call {
            op,
            id,
            token: token.to_string(),
        });
    }
}

pub fn remote_item(id: i64, user_id: &str, name: &str, quantity: i64) -> RemoteItem {
    RemoteItem {
        id,
        user_id: user_id.to_string(),
        name: name.to_string(),
        description: None,
        quantity,
        created_at: Some("2024-05-01T10:30:00.000000Z".to_string()),
        updated_at: Some("2024-05-01T10:30:00.000000Z".to_string()),
    }
}

#[async_trait]
impl ItemApi for FakeItemApi {
    async fn list(&self, token: &str) -> AppResult<ApiResponse<Vec<RemoteItem>>> {
        self.record("list", None, token);
        self.list.lock().unwrap().clone().into_result()
    }

    async fn create(
        &self,
        token: &str,
        _request: &CreateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>> {
        self.record("create", None, token);
        self.create.lock().unwrap().clone().into_result()
    }

    async fn get(&self, token: &str, id: i64) -> AppResult<ApiResponse<RemoteItem>> {
        self.record("get", Some(id), token);
        self.get.lock().unwrap().clone().into_result()
    }

    async fn update(
        &self,
        token: &str,
        id: i64,
        _request: &UpdateItemRequest,
    ) -> AppResult<ApiResponse<RemoteItem>> {
        self.record("update", Some(id), token);
        self.update.lock().unwrap().clone().into_result()
    }

    async fn delete(&self, token: &str, id: i64) -> AppResult<ApiResponse<()>> {
        self.record("delete", Some(id), token);
        self.delete.lock().unwrap().clone().into_result()
    }
}
