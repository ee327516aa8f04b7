pub mod item;
pub mod operation_result;
pub mod remote_item;

pub use item::*;
pub use operation_result::*;
pub use remote_item::*;
