//! Store settings read from the process environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx_sqlcipher_pool::{EngineConfig, Passphrase, PoolConfig};

use crate::Error;

pub const DB_PATH: &str = "CAREBOOK_DB_PATH";
pub const DB_KEY: &str = "CAREBOOK_DB_KEY";
pub const DB_MAX_READ_CONNECTIONS: &str = "CAREBOOK_DB_MAX_READ_CONNECTIONS";
pub const DB_ACQUIRE_TIMEOUT_MS: &str = "CAREBOOK_DB_ACQUIRE_TIMEOUT_MS";
pub const DB_IDLE_TIMEOUT_MS: &str = "CAREBOOK_DB_IDLE_TIMEOUT_MS";

/// Location, key and sizing for the store.
///
/// Anything not set keeps the [`PoolConfig`] default.
#[derive(Debug, Clone)]
pub struct StoreSettings {
   pub path: PathBuf,
   pub passphrase: Option<Passphrase>,
   pub max_read_connections: u32,
   pub acquire_timeout: Duration,
   pub idle_timeout: Duration,
}

impl StoreSettings {
   /// Settings for `path` with default sizing and no key.
   pub fn new(path: impl Into<PathBuf>) -> Self {
      let defaults = PoolConfig::default();
      Self {
         path: path.into(),
         passphrase: None,
         max_read_connections: defaults.max_read_connections,
         acquire_timeout: defaults.acquire_timeout,
         idle_timeout: defaults.idle_timeout,
      }
   }

   /// Reads the `CAREBOOK_DB_*` variables.
   pub fn from_env() -> Result<Self, Error> {
      Self::from_lookup(|name| std::env::var(name).ok())
   }

   /// Same as [`StoreSettings::from_env`] with an arbitrary variable source.
   pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
   where
      F: Fn(&str) -> Option<String>,
   {
      let path = lookup(DB_PATH)
         .filter(|p| !p.trim().is_empty())
         .ok_or(Error::MissingSetting(DB_PATH))?;

      let mut settings = Self::new(path);

      // An empty key means "unencrypted", same as an unset one
      settings.passphrase = lookup(DB_KEY)
         .filter(|k| !k.is_empty())
         .map(Passphrase::new);

      if let Some(max) = parse(&lookup, DB_MAX_READ_CONNECTIONS)? {
         settings.max_read_connections = max;
      }
      if let Some(ms) = parse::<u64, _>(&lookup, DB_ACQUIRE_TIMEOUT_MS)? {
         settings.acquire_timeout = Duration::from_millis(ms);
      }
      if let Some(ms) = parse::<u64, _>(&lookup, DB_IDLE_TIMEOUT_MS)? {
         settings.idle_timeout = Duration::from_millis(ms);
      }

      Ok(settings)
   }

   pub fn pool_config(&self) -> PoolConfig {
      let defaults = PoolConfig::default();
      PoolConfig {
         max_read_connections: self.max_read_connections,
         min_read_connections: defaults.min_read_connections.min(self.max_read_connections),
         acquire_timeout: self.acquire_timeout,
         idle_timeout: self.idle_timeout,
         engine: EngineConfig {
            passphrase: self.passphrase.clone(),
            ..defaults.engine.clone()
         },
         ..defaults
      }
   }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, Error>
where
   T: FromStr,
   T::Err: std::fmt::Display,
   F: Fn(&str) -> Option<String>,
{
   match lookup(name) {
      None => Ok(None),
      Some(raw) => raw
         .trim()
         .parse()
         .map(Some)
         .map_err(|e: T::Err| Error::InvalidSetting {
            name,
            reason: format!("{raw:?}: {e}"),
         }),
   }
}
