use crate::error::{AppError, AppResult};

/// Outcome envelope of a repository action. `Loading` only signals work in progress to a
/// watcher and is always followed by exactly one `Success` or `Error`.
#[derive(Debug)]
pub enum OperationResult<T> {
    Success(T),
    Error(AppError),
    Loading,
}

impl<T> OperationResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OperationResult::Error(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, OperationResult::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            OperationResult::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            OperationResult::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Converts a terminal outcome back into a `Result`; `None` while loading.
    pub fn into_result(self) -> Option<AppResult<T>> {
        match self {
            OperationResult::Success(v) => Some(Ok(v)),
            OperationResult::Error(e) => Some(Err(e)),
            OperationResult::Loading => None,
        }
    }
}

impl<T> From<AppResult<T>> for OperationResult<T> {
    fn from(result: AppResult<T>) -> Self {
        match result {
            Ok(v) => OperationResult::Success(v),
            Err(e) => OperationResult::Error(e),
        }
    }
}
