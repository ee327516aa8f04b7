use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::{CreateItemRequest, Item, OperationResult, UpdateItemRequest};
use crate::services::item_sync::{ItemSyncRepository, RefreshOutcome};

/// Latest mutation outcome, tagged with the operation that produced it.
#[derive(Debug)]
pub enum ActionStatus {
    Create(OperationResult<Item>),
    Update(OperationResult<Item>),
    /// Carries the deleted item's id.
    Delete(OperationResult<i64>),
    /// Carries the number of cached rows removed.
    ClearAll(OperationResult<u64>),
}

impl ActionStatus {
    pub fn is_loading(&self) -> bool {
        match self {
            ActionStatus::Create(r) | ActionStatus::Update(r) => r.is_loading(),
            ActionStatus::Delete(r) => r.is_loading(),
            ActionStatus::ClearAll(r) => r.is_loading(),
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            ActionStatus::Create(r) | ActionStatus::Update(r) => r.error(),
            ActionStatus::Delete(r) => r.error(),
            ActionStatus::ClearAll(r) => r.error(),
        }
    }
}

/// Entry points for presentation code. Every mutation publishes `Loading` and then exactly
/// one terminal result on [`ItemActions::status`]; the consumer calls
/// [`ItemActions::clear_status`] once it has handled it.
pub struct ItemActions {
    repo: Arc<ItemSyncRepository>,
    status: watch::Sender<Option<ActionStatus>>,
    loading: watch::Sender<bool>,
    in_flight: AtomicUsize,
}

/// Holds the loading flag up for one operation. The flag drops when the last guard does.
struct LoadingGuard<'a> {
    actions: &'a ItemActions,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let in_flight = &self.actions.in_flight;
        // The counter only changes under the watch lock.
        self.actions.loading.send_if_modified(|busy| {
            let remaining = in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
            if remaining == 0 && *busy {
                *busy = false;
                true
            } else {
                false
            }
        });
    }
}

impl ItemActions {
    pub fn new(repo: Arc<ItemSyncRepository>) -> Self {
        let (status, _) = watch::channel(None);
        let (loading, _) = watch::channel(false);
        Self {
            repo,
            status,
            loading,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn status(&self) -> watch::Receiver<Option<ActionStatus>> {
        self.status.subscribe()
    }

    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn clear_status(&self) {
        self.status.send_replace(None);
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        let in_flight = &self.in_flight;
        self.loading.send_if_modified(|busy| {
            in_flight.fetch_add(1, Ordering::Relaxed);
            !std::mem::replace(busy, true)
        });
        LoadingGuard { actions: self }
    }

    fn publish(&self, status: ActionStatus) {
        self.status.send_replace(Some(status));
    }

    fn current_user(&self) -> Option<String> {
        self.repo.identity().current_user_id()
    }

    /// Refuses unless `item` belongs to the signed-in user.
    fn authorize(&self, item: &Item) -> Result<(), AppError> {
        match self.current_user() {
            Some(user_id) if user_id == item.owner_id => Ok(()),
            _ => Err(AppError::Forbidden(format!(
                "item {} is not owned by the signed-in user",
                item.id
            ))),
        }
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        let _loading = self.begin_loading();
        self.repo.refresh().await
    }

    pub async fn create(&self, name: &str, description: Option<String>, quantity: i64) {
        if self.current_user().is_none() {
            self.publish(ActionStatus::Create(OperationResult::Error(
                AppError::Unauthenticated,
            )));
            return;
        }

        self.publish(ActionStatus::Create(OperationResult::Loading));
        let _loading = self.begin_loading();
        let request = CreateItemRequest::new(name, description, Some(quantity));
        let result = self.repo.create(request).await;
        self.publish(ActionStatus::Create(result));
    }

    /// Sends every editable field of `item` (full-record overwrite).
    pub async fn update(&self, item: &Item) {
        if let Err(e) = self.authorize(item) {
            self.publish(ActionStatus::Update(OperationResult::Error(e)));
            return;
        }

        self.publish(ActionStatus::Update(OperationResult::Loading));
        let _loading = self.begin_loading();
        let result = self.repo.update(item.id, UpdateItemRequest::from(item)).await;
        self.publish(ActionStatus::Update(result));
    }

    pub async fn delete(&self, item: &Item) {
        if let Err(e) = self.authorize(item) {
            self.publish(ActionStatus::Delete(OperationResult::Error(e)));
            return;
        }

        self.publish(ActionStatus::Delete(OperationResult::Loading));
        let _loading = self.begin_loading();
        let id = item.id;
        let result = match self.repo.delete(id).await {
            OperationResult::Success(()) => OperationResult::Success(id),
            OperationResult::Error(e) => OperationResult::Error(e),
            OperationResult::Loading => OperationResult::Loading,
        };
        self.publish(ActionStatus::Delete(result));
    }

    /// Clears the signed-in user's cache. Local only.
    pub async fn clear_all(&self) {
        let Some(user_id) = self.current_user() else {
            self.publish(ActionStatus::ClearAll(OperationResult::Error(
                AppError::Unauthenticated,
            )));
            return;
        };

        self.publish(ActionStatus::ClearAll(OperationResult::Loading));
        let _loading = self.begin_loading();
        let result = self.repo.delete_all_items_for_user(&user_id).await;
        self.publish(ActionStatus::ClearAll(result));
    }

    /// Refreshes now if someone is signed in, then again whenever a different user signs in.
    /// Stops when the identity provider goes away; abort the handle to stop earlier.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let actions = Arc::clone(self);
        let mut auth = self.repo.identity().auth_state();

        tokio::spawn(async move {
            let mut last = auth.borrow_and_update().clone();
            if last.is_some() {
                actions.refresh().await;
            }

            while auth.changed().await.is_ok() {
                let user_id = auth.borrow_and_update().clone();
                if user_id != last {
                    last = user_id;
                    if last.is_some() {
                        tracing::info!("Signed-in user changed, refreshing items");
                        actions.refresh().await;
                    }
                }
            }
        })
    }
}
