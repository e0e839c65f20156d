use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Socket address the API server binds to (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Shared secret expected in `Authorization: Bearer <secret>` on `/send-push`
    pub shared_secret: String,

    /// Base URL of the Expo push API (default: https://exp.host/--/api/v2)
    pub expo_api_url: String,

    /// Optional Expo access token for projects with enhanced push security
    pub expo_access_token: Option<String>,

    /// Per-call timeout for push gateway requests, in seconds (default: 30)
    pub gateway_timeout_secs: u64,

    /// Delay between dispatch and the receipt check, in seconds (default: 45)
    pub receipt_check_delay_secs: u64,

    /// Requests allowed per client IP per minute on `/send-push` (default: 300)
    pub rate_limit_per_minute: u32,

    /// Interval of the stale-receipt sweeper in seconds. 0 disables it.
    pub receipt_sweep_interval_secs: u64,

    /// Minimum age of a `Submitted` record before the sweeper picks it up (default: 900)
    pub receipt_sweep_min_age_secs: u64,

    /// Age after which a `Submitted` record whose receipt never arrived is
    /// failed by the sweeper (default: 86400)
    pub receipt_sweep_max_age_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            shared_secret: std::env::var("PUSH_SHARED_SECRET").map_err(|_| {
                anyhow::anyhow!("PUSH_SHARED_SECRET environment variable is required")
            })?,
            expo_api_url: std::env::var("EXPO_API_URL")
                .unwrap_or_else(|_| "https://exp.host/--/api/v2".to_string()),
            expo_access_token: std::env::var("EXPO_ACCESS_TOKEN").ok(),
            gateway_timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("GATEWAY_TIMEOUT_SECS must be a valid u64"))?,
            receipt_check_delay_secs: std::env::var("RECEIPT_CHECK_DELAY_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECEIPT_CHECK_DELAY_SECS must be a valid u64"))?,
            rate_limit_per_minute: std::env::var("RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PER_MINUTE must be a valid u32"))?,
            receipt_sweep_interval_secs: std::env::var("RECEIPT_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECEIPT_SWEEP_INTERVAL_SECS must be a valid u64"))?,
            receipt_sweep_min_age_secs: std::env::var("RECEIPT_SWEEP_MIN_AGE_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECEIPT_SWEEP_MIN_AGE_SECS must be a valid u64"))?,
            receipt_sweep_max_age_secs: std::env::var("RECEIPT_SWEEP_MAX_AGE_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECEIPT_SWEEP_MAX_AGE_SECS must be a valid u64"))?,
        })
    }
}
