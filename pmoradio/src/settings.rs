//! Réglages du moteur radio
//!
//! Ces structures sont indépendantes de `pmoconfig` : elles sont remplies
//! par [`crate::RadioConfigExt`] en production et construites directement
//! dans les tests.

use chrono::{DateTime, TimeZone, Utc};
use pmocache::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Début de la timeline de diffusion (2025-07-11 09:00 UTC)
pub fn default_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 11, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Débit par défaut (128 kbit/s)
pub const DEFAULT_BYTE_RATE: u64 = 16_000;

#[derive(Debug, Clone)]
pub struct RadioSettings {
    pub epoch: DateTime<Utc>,
    pub catalog: CatalogSettings,
    pub cache: CacheSettings,
    pub live: LiveSettings,
    pub stream: StreamSettings,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            catalog: CatalogSettings::default(),
            cache: CacheSettings::default(),
            live: LiveSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub path: PathBuf,
    /// Utilisé quand un enregistrement ne précise pas son débit
    pub default_byte_rate: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("videos.json"),
            default_byte_rate: DEFAULT_BYTE_RATE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub retry: RetryPolicy,
    /// 1 = piste suivante, 2 = les deux suivantes
    pub prefetch_depth: usize,
    pub blob_base_url: String,
    pub extension: String,
    pub storage_class: String,
    pub blob_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("temp"),
            retry: RetryPolicy::default(),
            prefetch_depth: 1,
            blob_base_url: String::new(),
            extension: "mp3".to_string(),
            storage_class: "STANDARD".to_string(),
            blob_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Sans URL, le direct n'est jamais détecté
    pub status_url: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub relay_program: String,
    /// Arguments du relais ; `{url}` est remplacé par l'URL de la source
    pub relay_args: Vec<String>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            status_url: None,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            relay_program: "ffmpeg".to_string(),
            relay_args: crate::relay::default_ffmpeg_args(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub chunk_size: usize,
    /// Nombre de chunks émis sans temporisation au démarrage
    pub preroll_chunks: usize,
    pub resolve_interval: Duration,
    pub client_queue: usize,
    pub backlog_chunks: usize,
    /// Envois consécutifs sur file pleine avant déconnexion
    pub max_strikes: u32,
    pub client_idle_timeout: Duration,
    pub redirect_url: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            preroll_chunks: 64,
            resolve_interval: Duration::from_secs(2),
            client_queue: 256,
            backlog_chunks: 32,
            max_strikes: 64,
            client_idle_timeout: Duration::from_secs(20),
            redirect_url: "http://www.monotonic.studio/live".to_string(),
        }
    }
}
