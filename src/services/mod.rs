pub mod item_actions;
pub mod item_feed;
pub mod item_sync;

pub use item_actions::{ActionStatus, ItemActions};
pub use item_feed::{FeedStream, ItemFeed};
pub use item_sync::{ItemSyncRepository, RefreshOutcome};
