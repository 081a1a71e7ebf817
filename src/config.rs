//! Runtime configuration.
//!
//! Values come from the environment first; rows in `local_settings` can then
//! override the tunables that an administrator may change at runtime.

use anyhow::{bail, Context};
use rusqlite::Connection;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db;
use crate::timers::DEFAULT_EXPIRY_THRESHOLD_MINUTES;

pub const ENV_DATA_DIR: &str = "LAUNDRY_DATA_DIR";
pub const ENV_LOG_DIR: &str = "LAUNDRY_LOG_DIR";
pub const ENV_THRESHOLD_MINUTES: &str = "LAUNDRY_TIMER_THRESHOLD_MINUTES";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "LAUNDRY_SWEEP_INTERVAL_SECS";
pub const ENV_PRICE_PER_LOAD: &str = "LAUNDRY_PRICE_PER_LOAD";

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_PRICE_PER_LOAD: f64 = 150.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LaundryConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub expiry_threshold_minutes: i64,
    pub sweep_interval_secs: u64,
    pub price_per_load: f64,
}

impl Default for LaundryConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        LaundryConfig {
            log_dir: data_dir.join("logs"),
            data_dir,
            expiry_threshold_minutes: DEFAULT_EXPIRY_THRESHOLD_MINUTES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            price_per_load: DEFAULT_PRICE_PER_LOAD,
        }
    }
}

impl LaundryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = LaundryConfig::default();

        if let Some(dir) = env_string(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        config.log_dir = match env_string(ENV_LOG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => config.data_dir.join("logs"),
        };
        if let Some(minutes) = env_parsed::<i64>(ENV_THRESHOLD_MINUTES)? {
            config.expiry_threshold_minutes = minutes;
        }
        if let Some(secs) = env_parsed::<u64>(ENV_SWEEP_INTERVAL_SECS)? {
            config.sweep_interval_secs = secs;
        }
        if let Some(price) = env_parsed::<f64>(ENV_PRICE_PER_LOAD)? {
            config.price_per_load = price;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides stored in `local_settings`. Values that do not parse
    /// or fail validation are skipped.
    pub fn apply_settings(&mut self, conn: &Connection) {
        if let Some(minutes) = setting_parsed::<i64>(conn, "timer", "expiry_threshold_minutes") {
            if minutes > 0 {
                self.expiry_threshold_minutes = minutes;
            } else {
                warn!(minutes, "Ignoring non-positive timer threshold setting");
            }
        }
        if let Some(secs) = setting_parsed::<u64>(conn, "timer", "sweep_interval_secs") {
            if secs > 0 {
                self.sweep_interval_secs = secs;
            } else {
                warn!("Ignoring zero sweep interval setting");
            }
        }
        if let Some(price) = setting_parsed::<f64>(conn, "pricing", "price_per_load") {
            if price.is_finite() && price >= 0.0 {
                self.price_per_load = price;
            } else {
                warn!(price, "Ignoring invalid price per load setting");
            }
        }
        info!(
            threshold_minutes = self.expiry_threshold_minutes,
            sweep_interval_secs = self.sweep_interval_secs,
            price_per_load = self.price_per_load,
            "Configuration loaded"
        );
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.expiry_threshold_minutes <= 0 {
            bail!(
                "{ENV_THRESHOLD_MINUTES} must be positive, got {}",
                self.expiry_threshold_minutes
            );
        }
        if self.sweep_interval_secs == 0 {
            bail!("{ENV_SWEEP_INTERVAL_SECS} must be positive");
        }
        if !self.price_per_load.is_finite() || self.price_per_load < 0.0 {
            bail!(
                "{ENV_PRICE_PER_LOAD} must be non-negative, got {}",
                self.price_per_load
            );
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid {name} value '{raw}'"))
        })
        .transpose()
}

fn setting_parsed<T: FromStr>(conn: &Connection, category: &str, key: &str) -> Option<T> {
    let raw = db::get_setting(conn, category, key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(category, key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 5] = [
        ENV_DATA_DIR,
        ENV_LOG_DIR,
        ENV_THRESHOLD_MINUTES,
        ENV_SWEEP_INTERVAL_SECS,
        ENV_PRICE_PER_LOAD,
    ];

    fn clear_env() {
        for name in ALL_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = LaundryConfig::from_env().unwrap();
        assert_eq!(config, LaundryConfig::default());
        assert_eq!(config.expiry_threshold_minutes, 30);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.log_dir, PathBuf::from("./data").join("logs"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var(ENV_DATA_DIR, "/srv/laundry");
        env::set_var(ENV_THRESHOLD_MINUTES, "45");
        env::set_var(ENV_SWEEP_INTERVAL_SECS, "15");
        env::set_var(ENV_PRICE_PER_LOAD, "99.5");

        let config = LaundryConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.data_dir, PathBuf::from("/srv/laundry"));
        assert_eq!(config.log_dir, PathBuf::from("/srv/laundry").join("logs"));
        assert_eq!(config.expiry_threshold_minutes, 45);
        assert_eq!(config.sweep_interval_secs, 15);
        assert_eq!(config.price_per_load, 99.5);
    }

    #[test]
    #[serial]
    fn test_invalid_env_is_an_error() {
        clear_env();
        env::set_var(ENV_THRESHOLD_MINUTES, "half an hour");
        let err = LaundryConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(ENV_THRESHOLD_MINUTES));

        env::set_var(ENV_THRESHOLD_MINUTES, "0");
        assert!(LaundryConfig::from_env().is_err());

        env::set_var(ENV_THRESHOLD_MINUTES, "30");
        env::set_var(ENV_PRICE_PER_LOAD, "-1");
        assert!(LaundryConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_settings_override_and_ignore_garbage() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        db::set_setting(&conn, "timer", "expiry_threshold_minutes", "20").unwrap();
        db::set_setting(&conn, "timer", "sweep_interval_secs", "soon").unwrap();
        db::set_setting(&conn, "pricing", "price_per_load", "-3").unwrap();

        let mut config = LaundryConfig::default();
        config.apply_settings(&conn);
        assert_eq!(config.expiry_threshold_minutes, 20);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(config.price_per_load, DEFAULT_PRICE_PER_LOAD);
    }
}
