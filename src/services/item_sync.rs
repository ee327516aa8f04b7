use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::db::{ItemStore, ItemStream};
use crate::error::{AppError, AppResult};
use crate::http_client::{ApiResponse, ItemApi};
use crate::models::{CreateItemRequest, Item, OperationResult, UpdateItemRequest};

/// What a refresh did. Refresh failures are logged, never returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The user's partition now holds exactly this many server items.
    Replaced(usize),
    /// No user id or token; nothing was sent.
    NotAuthenticated,
    /// The server rejected the request, returned no body, or could not be reached.
    /// Local data is untouched.
    RemoteFailed,
    /// The server answered but the cache could not be rewritten. Local data is untouched.
    StoreFailed,
}

struct Credentials {
    user_id: String,
    token: String,
}

/// Reconciles the local item cache with the inventory API for the signed-in user.
///
/// Reads never touch the network. Mutations go to the server first and are written
/// through to the cache only when the server accepted them. `refresh` replaces the user's
/// whole partition with the server's list.
pub struct ItemSyncRepository {
    store: ItemStore,
    api: Arc<dyn ItemApi>,
    identity: Arc<dyn IdentityProvider>,
}

impl ItemSyncRepository {
    pub fn new(store: ItemStore, api: Arc<dyn ItemApi>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            api,
            identity,
        }
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    async fn credentials(&self) -> Option<Credentials> {
        let token = match self.identity.current_token(false).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Error getting ID token: {}", e);
                None
            }
        };
        let user_id = self.identity.current_user_id();

        match (user_id, token) {
            (Some(user_id), Some(token)) if !user_id.is_empty() && !token.is_empty() => {
                Some(Credentials { user_id, token })
            }
            _ => None,
        }
    }

    async fn require_credentials(&self, action: &str) -> AppResult<Credentials> {
        self.credentials().await.ok_or_else(|| {
            tracing::warn!("Cannot {} item: user is not authenticated", action);
            AppError::Unauthenticated
        })
    }

    fn finish<T>(action: &str, result: AppResult<T>) -> OperationResult<T> {
        if let Err(e) = &result {
            tracing::error!("Failed to {} item: {}", action, e);
        }
        result.into()
    }

    pub fn get_all_items(&self, owner_id: &str) -> ItemStream<Vec<Item>> {
        self.store.observe_all(owner_id)
    }

    pub fn get_item_by_id(&self, id: i64, owner_id: &str) -> ItemStream<Option<Item>> {
        self.store.observe_by_id(owner_id, id)
    }

    pub fn search_items(&self, query: &str, owner_id: &str) -> ItemStream<Vec<Item>> {
        self.store.search(owner_id, query)
    }

    /// Local-only: the API has no bulk delete.
    pub async fn delete_all_items_for_user(&self, owner_id: &str) -> OperationResult<u64> {
        let result = self.store.delete_all_for_owner(owner_id).await;
        if let Ok(count) = &result {
            tracing::info!("Cleared {} cached items for user {}", count, owner_id);
        }
        Self::finish("clear", result)
    }

    /// Replaces the signed-in user's cached items with the server's list.
    ///
    /// Destructive: local rows missing from the server response are dropped. Delete and
    /// insert commit together, so observers see the old set and then the new one.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(creds) = self.credentials().await else {
            tracing::warn!("Cannot refresh items: token or user id is missing");
            return RefreshOutcome::NotAuthenticated;
        };

        let remote_items = match self.api.list(&creds.token).await {
            Ok(ApiResponse::Ok {
                body: Some(items), ..
            }) => items,
            Ok(ApiResponse::Ok { status, body: None }) => {
                tracing::error!("Error fetching items from server: {} - empty body", status);
                return RefreshOutcome::RemoteFailed;
            }
            Ok(ApiResponse::Rejected { status, message }) => {
                tracing::error!("Error fetching items from server: {} - {}", status, message);
                return RefreshOutcome::RemoteFailed;
            }
            Err(e) => {
                tracing::error!("Exception fetching items from server: {}", e);
                return RefreshOutcome::RemoteFailed;
            }
        };

        // The list endpoint is scoped by the token, so every row belongs to the caller.
        let items: Vec<Item> = remote_items
            .iter()
            .map(|remote| {
                if remote.user_id != creds.user_id {
                    tracing::debug!(
                        "Item {} echoes owner {}, caching under {}",
                        remote.id,
                        remote.user_id,
                        creds.user_id
                    );
                }
                remote.to_local(&creds.user_id)
            })
            .collect();

        match self.store.replace_all_for_owner(&creds.user_id, &items).await {
            Ok(count) => {
                tracing::info!(
                    "Items refreshed from server: {} items for user {}",
                    count,
                    creds.user_id
                );
                RefreshOutcome::Replaced(count)
            }
            Err(e) => {
                tracing::error!("Failed to store refreshed items: {}", e);
                RefreshOutcome::StoreFailed
            }
        }
    }

    pub async fn create(&self, request: CreateItemRequest) -> OperationResult<Item> {
        Self::finish("create", self.try_create(&request).await)
    }

    async fn try_create(&self, request: &CreateItemRequest) -> AppResult<Item> {
        let creds = self.require_credentials("create").await?;

        let created = self
            .api
            .create(&creds.token, request)
            .await?
            .into_body()?
            .ok_or(AppError::EmptyResponse("create"))?;

        // Server id, local owner: the echoed user_id is not trusted here.
        let item = created.to_local(&creds.user_id);
        self.store.upsert(&item).await?;
        tracing::info!("Item created on server and cached: {}", item.id);
        Ok(item)
    }

    pub async fn update(&self, id: i64, request: UpdateItemRequest) -> OperationResult<Item> {
        Self::finish("update", self.try_update(id, &request).await)
    }

    async fn try_update(&self, id: i64, request: &UpdateItemRequest) -> AppResult<Item> {
        let creds = self.require_credentials("update").await?;

        let updated = self
            .api
            .update(&creds.token, id, request)
            .await?
            .into_body()?
            .ok_or(AppError::EmptyResponse("update"))?;

        let item = self.write_through(updated.to_local(&creds.user_id)).await?;
        tracing::info!("Item updated on server and in cache: {}", item.id);
        Ok(item)
    }

    pub async fn delete(&self, id: i64) -> OperationResult<()> {
        Self::finish("delete", self.try_delete(id).await)
    }

    async fn try_delete(&self, id: i64) -> AppResult<()> {
        let creds = self.require_credentials("delete").await?;

        self.api.delete(&creds.token, id).await?.into_body()?;

        // Scoped by owner: a stale id never removes another user's row.
        let affected = self.store.delete_by_id(id, &creds.user_id).await?;
        tracing::info!(
            "Item deleted on server and from cache: {} ({} local rows)",
            id,
            affected
        );
        Ok(())
    }

    /// Fetches one item from the server and writes it through to the cache.
    pub async fn refresh_item(&self, id: i64) -> OperationResult<Item> {
        Self::finish("fetch", self.try_refresh_item(id).await)
    }

    async fn try_refresh_item(&self, id: i64) -> AppResult<Item> {
        let creds = self.require_credentials("fetch").await?;

        let fetched = self
            .api
            .get(&creds.token, id)
            .await?
            .into_body()?
            .ok_or(AppError::EmptyResponse("get"))?;

        self.write_through(fetched.to_local(&creds.user_id)).await
    }

    /// Updates the cached row in place (keeping its `created_at`), inserting it when the
    /// cache does not have it yet. Returns the row as stored.
    async fn write_through(&self, item: Item) -> AppResult<Item> {
        if self.store.update(&item).await? == 0 {
            self.store.upsert(&item).await?;
        }
        Ok(self
            .store
            .get(&item.owner_id, item.id)
            .await?
            .unwrap_or(item))
    }
}
