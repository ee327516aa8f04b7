use std::env;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://inventory.db";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub database_url: String,
    pub http_timeout_secs: u64,
    pub user_id: Option<String>,
    pub token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            api_base_url: env::var("ITEMS_API_BASE_URL")?,
            database_url: env::var("ITEMS_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            http_timeout_secs: env::var("ITEMS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            user_id: env::var("ITEMS_USER_ID").ok().filter(|v| !v.is_empty()),
            token: env::var("ITEMS_TOKEN").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
