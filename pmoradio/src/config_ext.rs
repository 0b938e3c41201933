//! Extension pour lire la configuration de la radio depuis pmoconfig
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmoradio::RadioConfigExt;
//!
//! let settings = get_config().get_radio_settings()?;
//! let radio = pmoradio::Radio::start(settings).await?;
//! ```

use crate::settings::{
    default_epoch, CacheSettings, CatalogSettings, LiveSettings, RadioSettings, StreamSettings,
    DEFAULT_BYTE_RATE,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use pmocache::RetryPolicy;
use pmoconfig::Config;
use serde_yaml::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Trait d'extension pour gérer la configuration de la radio dans pmoconfig
pub trait RadioConfigExt {
    /// Début de la timeline de diffusion (`radio.epoch`, RFC 3339)
    fn get_radio_epoch(&self) -> Result<DateTime<Utc>>;

    /// Définit l'epoch ; n'affecte qu'un processus redémarré
    fn set_radio_epoch(&self, epoch: DateTime<Utc>) -> Result<()>;

    /// Chemin absolu du catalogue (`radio.catalog.path`, relatif au config_dir)
    fn get_radio_catalog_path(&self) -> PathBuf;

    /// Répertoire du cache de pistes, créé si nécessaire
    fn get_radio_cache_dir(&self) -> Result<String>;

    /// URL du statut du direct, `None` si désactivé
    fn get_radio_live_status_url(&self) -> Option<String>;

    /// Tous les réglages de la radio
    fn get_radio_settings(&self) -> Result<RadioSettings>;
}

fn secs(config: &Config, path: &[&str], default: u64) -> Duration {
    Duration::from_secs(config.get_u64_or(path, default))
}

impl RadioConfigExt for Config {
    fn get_radio_epoch(&self) -> Result<DateTime<Utc>> {
        match self.get_value(&["radio", "epoch"]) {
            Ok(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| anyhow!("Invalid radio.epoch {:?}: {}", s, e)),
            _ => Ok(default_epoch()),
        }
    }

    fn set_radio_epoch(&self, epoch: DateTime<Utc>) -> Result<()> {
        self.set_value(&["radio", "epoch"], Value::String(epoch.to_rfc3339()))
    }

    fn get_radio_catalog_path(&self) -> PathBuf {
        let path = self.get_string_or(&["radio", "catalog", "path"], "videos.json");
        self.resolve_path(&path)
    }

    fn get_radio_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&["radio", "cache", "directory"], "temp")
    }

    fn get_radio_live_status_url(&self) -> Option<String> {
        Some(self.get_string_or(&["radio", "live", "status_url"], ""))
            .filter(|url| !url.is_empty())
    }

    fn get_radio_settings(&self) -> Result<RadioSettings> {
        let catalog = CatalogSettings {
            path: self.get_radio_catalog_path(),
            default_byte_rate: self
                .get_u64_or(&["radio", "catalog", "default_byte_rate"], DEFAULT_BYTE_RATE)
                .max(1),
        };

        let cache = CacheSettings {
            directory: PathBuf::from(self.get_radio_cache_dir()?),
            retry: RetryPolicy::new(
                self.get_u64_or(&["radio", "cache", "max_attempts"], 3) as u32,
                Duration::from_millis(self.get_u64_or(&["radio", "cache", "backoff_base_ms"], 1000)),
            ),
            prefetch_depth: self.get_u64_or(&["radio", "cache", "prefetch_depth"], 1) as usize,
            blob_base_url: self.get_string_or(&["radio", "blob", "base_url"], ""),
            extension: self.get_string_or(&["radio", "blob", "extension"], "mp3"),
            storage_class: self.get_string_or(&["radio", "blob", "storage_class"], "STANDARD"),
            blob_timeout: secs(self, &["radio", "blob", "timeout_secs"], 300),
        };
        if cache.blob_base_url.is_empty() {
            return Err(anyhow!("radio.blob.base_url must be set"));
        }

        let live_defaults = LiveSettings::default();
        let relay_args = match self.get_value(&["radio", "live", "relay_args"]) {
            Ok(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => live_defaults.relay_args,
        };
        let live = LiveSettings {
            status_url: self.get_radio_live_status_url(),
            poll_interval: secs(self, &["radio", "live", "poll_interval_secs"], 5),
            timeout: secs(self, &["radio", "live", "timeout_secs"], 2),
            relay_program: self.get_string_or(&["radio", "live", "relay_command"], "ffmpeg"),
            relay_args,
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            chunk_size: self.get_u64_or(&["radio", "stream", "chunk_size"], 1024).max(1) as usize,
            preroll_chunks: self.get_u64_or(&["radio", "stream", "preroll_chunks"], 64) as usize,
            resolve_interval: secs(self, &["radio", "stream", "resolve_interval_secs"], 2)
                .max(Duration::from_millis(100)),
            client_queue: self.get_u64_or(&["radio", "stream", "client_queue"], 256).max(1)
                as usize,
            backlog_chunks: self.get_u64_or(&["radio", "stream", "backlog_chunks"], 32) as usize,
            max_strikes: self.get_u64_or(&["radio", "stream", "max_strikes"], 64).max(1) as u32,
            client_idle_timeout: secs(self, &["radio", "stream", "client_idle_timeout_secs"], 20),
            redirect_url: self.get_string_or(&["radio", "stream", "redirect_url"], &defaults.redirect_url),
        };

        Ok(RadioSettings {
            epoch: self.get_radio_epoch()?,
            catalog,
            cache,
            live,
            stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_embedded_defaults() {
        let (dir, config) = config();
        let settings = config.get_radio_settings().unwrap();

        assert_eq!(settings.epoch, default_epoch());
        assert_eq!(settings.catalog.path, dir.path().join("videos.json"));
        assert_eq!(settings.catalog.default_byte_rate, 16_000);
        assert_eq!(settings.cache.retry.max_attempts, 3);
        assert_eq!(settings.stream.chunk_size, 1024);
        assert!(settings.live.status_url.is_some());
        assert!(settings.cache.directory.ends_with("temp"));
    }

    #[test]
    fn test_epoch_roundtrip_and_validation() {
        let (_dir, config) = config();
        let epoch = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        config.set_radio_epoch(epoch).unwrap();
        assert_eq!(config.get_radio_epoch().unwrap(), epoch);

        config
            .set_value(&["radio", "epoch"], Value::String("yesterday".into()))
            .unwrap();
        assert!(config.get_radio_epoch().is_err());
    }
}
