use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

pub const DEFAULT_NOTIFICATION_LIMIT: usize = 10;
pub const DEFAULT_BADGE_CEILING: usize = 9;
pub const DEFAULT_RECONCILE_SECS: u64 = 30;
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Knobs shared by the views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    /// How many unread messages the notification aggregator keeps.
    pub notification_limit: usize,

    /// Badge counts above this are shown as "<ceiling>+".
    pub badge_ceiling: usize,

    /// Full refresh period that bounds staleness when live updates stop
    /// arriving. `None` disables polling.
    pub reconcile_interval: Option<Duration>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            badge_ceiling: DEFAULT_BADGE_CEILING,
            reconcile_interval: Some(Duration::from_secs(DEFAULT_RECONCILE_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    /// HS256 secret for session tokens, see [`crate::Session::sign_in_with_config`].
    pub jwt_secret: String,
    pub feed_capacity: usize,
    pub views: ViewOptions,
}

impl SyncConfig {
    /// Read `FOUNDIT_*` variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let positive = |key: &str, default: usize| -> Result<usize> {
            let value: usize = var(key, &default.to_string())
                .parse()
                .with_context(|| format!("{} must be a positive integer", key))?;
            if value == 0 {
                bail!("{} must be a positive integer", key);
            }
            Ok(value)
        };

        let reconcile_secs: u64 = var("FOUNDIT_RECONCILE_SECS", &DEFAULT_RECONCILE_SECS.to_string())
            .parse()
            .context("FOUNDIT_RECONCILE_SECS must be a whole number of seconds")?;

        Ok(Self {
            db_path: PathBuf::from(var("FOUNDIT_DB_PATH", "foundit.db")),
            jwt_secret: var("FOUNDIT_JWT_SECRET", "dev-secret-change-me"),
            feed_capacity: positive("FOUNDIT_FEED_CAPACITY", DEFAULT_FEED_CAPACITY)?,
            views: ViewOptions {
                notification_limit: positive(
                    "FOUNDIT_NOTIFICATION_LIMIT",
                    DEFAULT_NOTIFICATION_LIMIT,
                )?,
                badge_ceiling: positive("FOUNDIT_BADGE_CEILING", DEFAULT_BADGE_CEILING)?,
                reconcile_interval: (reconcile_secs > 0)
                    .then(|| Duration::from_secs(reconcile_secs)),
            },
        })
    }
}
