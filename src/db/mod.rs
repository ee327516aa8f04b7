pub mod item_store;
pub mod pool;

pub use item_store::{ItemStore, ItemStream};
pub use pool::{create_memory_pool, create_pool};
