use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Runtime configuration, read once at startup. Everything has a dev
/// default so `cargo run` works out of a bare checkout.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub notify_db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub reminder_delay: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret =
            std::env::var("BEACON_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let db_path = std::env::var("BEACON_DB_PATH").unwrap_or_else(|_| "beacon.db".into());
        let notify_db_path = std::env::var("BEACON_NOTIFY_DB_PATH")
            .unwrap_or_else(|_| "beacon-notifications.db".into());
        let host = std::env::var("BEACON_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("BEACON_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("BEACON_PORT must be a port number")?;
        let reminder_delay_mins: u64 = std::env::var("BEACON_REMINDER_DELAY_MINS")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .context("BEACON_REMINDER_DELAY_MINS must be a number of minutes")?;

        Ok(Config {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            notify_db_path: PathBuf::from(notify_db_path),
            host,
            port,
            reminder_delay: Duration::from_secs(reminder_delay_mins * 60),
        })
    }
}
