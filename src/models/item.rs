use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};

/// Current wall-clock time in epoch milliseconds, the unit of `created_at`/`updated_at`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A cached item row. `(owner_id, id)` addresses it; ids are server-assigned when positive
/// and provisional when negative.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Item {
    /// Builds an item stamped with the current local time. Pass `id = 0` to let the
    /// store allocate a provisional id.
    pub fn new(
        id: i64,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        quantity: i64,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            owner_id: owner_id.into(),
            name: name.into(),
            description,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.owner_id.is_empty() {
            return Err(AppError::InvalidInput("owner_id is required".to_string()));
        }
        if self.name.is_empty() {
            return Err(AppError::InvalidInput("name is required".to_string()));
        }
        if self.quantity < 0 {
            return Err(AppError::InvalidInput(format!(
                "quantity must not be negative (got {})",
                self.quantity
            )));
        }
        Ok(())
    }
}
