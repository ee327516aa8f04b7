use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User is not authenticated")]
    Unauthenticated,

    #[error("Operation not permitted: {0}")]
    Forbidden(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote rejected request: {status} - {message}")]
    Remote { status: u16, message: String },

    #[error("Empty response body: {0}")]
    EmptyResponse(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Transport(format!("request timed out: {}", err))
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_includes_status() {
        let err = AppError::Remote {
            status: 422,
            message: "The name field is required.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote rejected request: 422 - The name field is required."
        );
    }
}
