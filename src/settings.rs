//! Runtime settings read from the environment (and `.env`, when present).

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::broadcast::BroadcastConfig;
use crate::queue::DispatchConfig;
use crate::rate_limit::RateLimitConfig;
use crate::types::UserId;

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseSettings {
    /// Key/value connection string understood by `tokio_postgres::connect`.
    pub fn connection_string(&self) -> String {
        let mut conn = format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.name, self.user
        );
        if !self.password.is_empty() {
            conn.push_str(&format!(" password={}", self.password));
        }
        conn
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: Option<String>,
    pub admin_user_ids: Vec<UserId>,
    pub bonus_cooldown_minutes: u32,
    pub rate_limit: RateLimitConfig,
    pub dispatch: DispatchConfig,
    pub broadcast: BroadcastConfig,
    pub database: DatabaseSettings,
}

impl Settings {
    /// Load `.env` if one exists, then read the process environment.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                warn!(error = %err, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Missing or unparsable
    /// values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let dispatch_defaults = DispatchConfig::default();
        let broadcast_defaults = BroadcastConfig::default();

        let dispatch = DispatchConfig {
            batch_size: parse_or(&lookup, "BROADCAST_BATCH_SIZE", dispatch_defaults.batch_size).max(1),
            inter_batch_delay: millis_or(&lookup, "BROADCAST_BATCH_DELAY_MS", dispatch_defaults.inter_batch_delay),
            inter_message_delay: millis_or(
                &lookup,
                "BROADCAST_MESSAGE_DELAY_MS",
                dispatch_defaults.inter_message_delay,
            ),
            retry_base: millis_or(&lookup, "BROADCAST_RETRY_BASE_MS", dispatch_defaults.retry_base),
        };

        let broadcast = BroadcastConfig {
            poll_interval: millis_or(&lookup, "BROADCAST_POLL_MS", broadcast_defaults.poll_interval),
            max_wait: Duration::from_secs(parse_or(
                &lookup,
                "BROADCAST_MAX_WAIT_SECS",
                broadcast_defaults.max_wait.as_secs(),
            )),
            ..broadcast_defaults
        };

        let database = DatabaseSettings {
            host: lookup("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(&lookup, "DB_PORT", 5432),
            name: lookup("DB_NAME").unwrap_or_else(|| "promobot".to_string()),
            user: lookup("DB_USER").unwrap_or_else(|| "postgres".to_string()),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
        };

        Self {
            bot_token: lookup("BOT_TOKEN").filter(|t| !t.is_empty()),
            admin_user_ids: parse_admin_ids(lookup("ADMIN_USER_IDS").as_deref().unwrap_or("")),
            bonus_cooldown_minutes: parse_or(&lookup, "BONUS_REQUEST_COOLDOWN_MINUTES", 5),
            rate_limit: RateLimitConfig::per_minute(parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", 10)),
            dispatch,
            broadcast,
            database,
        }
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "invalid setting, using default");
                default
            }
        },
        None => default,
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}

/// Comma separated ids; blanks and non-numbers are skipped.
fn parse_admin_ids(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter_map(|id| id.parse::<i64>().ok())
        .map(UserId)
        .collect()
}
