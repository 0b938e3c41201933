//! Catalogue des pistes diffusables
//!
//! Un [`Catalog`] est un instantané immuable. Le rechargement produit un
//! nouvel instantané (version incrémentée) que [`CatalogHandle`] substitue
//! atomiquement à l'ancien ; un calcul en cours garde l'instantané qu'il a
//! obtenu.
//!
//! Format source : objet JSON indexé par id
//!
//! ```json
//! {
//!   "dQw4w9WgXcQ": {
//!     "title": "Session #12",
//!     "description": "...",
//!     "duration": 3600.5,
//!     "bitrate": 128000,
//!     "genres": ["ambient", "techno"]
//!   }
//! }
//! ```
//!
//! Un tableau d'enregistrements portant un champ `id` est aussi accepté.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Entrée du catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub show: Option<String>,
    pub duration_seconds: f64,
    /// Octets par seconde
    pub byte_rate: u64,
    /// Clé de l'objet dans le blob store
    pub media_ref: String,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, duration_seconds: f64, byte_rate: u64) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            media_ref: id.clone(),
            id,
            description: String::new(),
            genres: Vec::new(),
            show: None,
            duration_seconds,
            byte_rate,
            thumbnail_ref: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Une piste n'est programmable qu'avec une durée et un débit positifs
    pub fn is_schedulable(&self) -> bool {
        self.duration_seconds.is_finite() && self.duration_seconds > 0.0 && self.byte_rate > 0
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Genres {
    List(Vec<String>),
    Csv(String),
    #[default]
    None,
}

impl Genres {
    fn into_vec(self) -> Vec<String> {
        match self {
            Genres::List(list) => list,
            Genres::Csv(s) => s
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect(),
            Genres::None => Vec::new(),
        }
    }
}

/// Enregistrement tel que produit par l'outillage d'import
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "duration_seconds")]
    duration: f64,
    /// Bits par seconde
    #[serde(default)]
    bitrate: Option<f64>,
    #[serde(default)]
    byte_rate: Option<u64>,
    #[serde(default)]
    genres: Genres,
    #[serde(default)]
    show: Option<String>,
    #[serde(default, alias = "thumbnail_ref")]
    thumbnail: Option<String>,
    #[serde(default, alias = "media_ref")]
    media: Option<String>,
}

impl RawRecord {
    fn into_track(self, id: String, default_byte_rate: u64) -> Track {
        let byte_rate = self
            .byte_rate
            .or_else(|| {
                self.bitrate
                    .filter(|b| b.is_finite() && *b > 0.0)
                    .map(|b| (b / 8.0).round() as u64)
            })
            .unwrap_or(default_byte_rate);

        Track {
            title: self.title.unwrap_or_else(|| id.clone()),
            media_ref: self.media.unwrap_or_else(|| id.clone()),
            id,
            description: self.description,
            genres: self.genres.into_vec(),
            show: self.show,
            duration_seconds: self.duration,
            byte_rate,
            thumbnail_ref: self.thumbnail,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Keyed(HashMap<String, RawRecord>),
    List(Vec<RawRecord>),
}

/// Instantané immuable du catalogue
#[derive(Debug, Clone)]
pub struct Catalog {
    tracks: HashMap<String, Arc<Track>>,
    /// Ordre canonique (tri lexicographique), base du mélange déterministe
    ids: Vec<String>,
    total_duration: f64,
    version: u64,
}

impl Catalog {
    /// Construit un instantané, en écartant les pistes non programmables
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>, version: u64) -> Result<Self> {
        let mut map = HashMap::new();
        for track in tracks {
            if !track.is_schedulable() {
                warn!(
                    id = %track.id,
                    duration = track.duration_seconds,
                    byte_rate = track.byte_rate,
                    "Excluding track from catalog"
                );
                continue;
            }
            if map.contains_key(&track.id) {
                warn!(id = %track.id, "Duplicate track id, keeping the last record");
            }
            map.insert(track.id.clone(), Arc::new(track));
        }

        if map.is_empty() {
            return Err(Error::Config("catalog has no schedulable track".into()));
        }

        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        let total_duration = ids.iter().map(|id| map[id].duration_seconds).sum::<f64>();
        if !(total_duration.is_finite() && total_duration > 0.0) {
            return Err(Error::Config(format!(
                "catalog total duration must be positive, got {}",
                total_duration
            )));
        }

        Ok(Self {
            tracks: map,
            ids,
            total_duration,
            version,
        })
    }

    /// Parse un document JSON
    pub fn parse(json: &str, default_byte_rate: u64, version: u64) -> Result<Self> {
        let tracks: Vec<Track> = match serde_json::from_str(json)? {
            CatalogDocument::Keyed(records) => records
                .into_iter()
                .map(|(id, record)| record.into_track(id, default_byte_rate))
                .collect(),
            CatalogDocument::List(records) => records
                .into_iter()
                .filter_map(|record| match record.id.clone() {
                    Some(id) if !id.is_empty() => Some(record.into_track(id, default_byte_rate)),
                    _ => {
                        warn!("Skipping catalog record without id");
                        None
                    }
                })
                .collect(),
        };
        Self::from_tracks(tracks, version)
    }

    pub async fn load(path: &Path, default_byte_rate: u64, version: u64) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::parse(&json, default_byte_rate, version)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Track>> {
        self.tracks.get(id)
    }

    /// Toutes les pistes, dans l'ordre canonique
    pub fn list_all(&self) -> Vec<Arc<Track>> {
        self.ids.iter().map(|id| self.tracks[id].clone()).collect()
    }

    /// Piste au rang `rank` de l'ordre canonique
    pub fn track_at(&self, rank: usize) -> &Arc<Track> {
        &self.tracks[&self.ids[rank]]
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Référence partagée vers l'instantané courant du catalogue
#[derive(Debug)]
pub struct CatalogHandle {
    source: Option<PathBuf>,
    default_byte_rate: u64,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    /// Charge le catalogue depuis un fichier ; un échec empêche le démarrage
    pub async fn open(path: impl Into<PathBuf>, default_byte_rate: u64) -> Result<Self> {
        let path = path.into();
        let catalog = Catalog::load(&path, default_byte_rate, 1).await?;
        info!(
            path = %path.display(),
            tracks = catalog.len(),
            total_hours = catalog.total_duration() / 3600.0,
            "Catalog loaded"
        );
        Ok(Self {
            source: Some(path),
            default_byte_rate,
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Catalogue en mémoire, sans fichier source
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            source: None,
            default_byte_rate: crate::settings::DEFAULT_BYTE_RATE,
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remplace l'instantané ; la version est forcée au-delà de la courante
    pub fn replace(&self, mut catalog: Catalog) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        catalog.version = catalog.version.max(guard.version + 1);
        let version = catalog.version;
        *guard = Arc::new(catalog);
        version
    }

    /// Relit le fichier source ; en cas d'échec l'instantané courant est conservé
    pub async fn reload(&self) -> Result<u64> {
        let Some(path) = &self.source else {
            return Ok(self.snapshot().version());
        };
        let next_version = self.snapshot().version() + 1;
        let catalog = Catalog::load(path, self.default_byte_rate, next_version).await?;
        let tracks = catalog.len();
        let version = self.replace(catalog);
        info!(version, tracks, "Catalog reloaded");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keyed_document() {
        let json = r#"{
            "b": {"title": "Second", "description": "d", "duration": 50, "bitrate": 128000},
            "a": {"title": "First", "duration": 100.5, "genres": "ambient, techno"},
            "z": {"title": "Broken", "duration": 0}
        }"#;
        let catalog = Catalog::parse(json, 16_000, 1).unwrap();

        assert_eq!(catalog.ids(), ["a", "b"]);
        assert_eq!(catalog.total_duration(), 150.5);
        let a = catalog.get("a").unwrap();
        assert_eq!(a.byte_rate, 16_000);
        assert_eq!(a.genres, vec!["ambient", "techno"]);
        assert_eq!(catalog.get("b").unwrap().byte_rate, 16_000);
        assert!(catalog.get("z").is_none());
    }

    #[test]
    fn test_parse_list_document() {
        let json = r#"[
            {"id": "x", "title": "X", "duration": 10, "byte_rate": 24000, "genres": ["jazz"]},
            {"title": "no id", "duration": 10}
        ]"#;
        let catalog = Catalog::parse(json, 16_000, 3).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.version(), 3);
        assert_eq!(catalog.get("x").unwrap().byte_rate, 24_000);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        let err = Catalog::parse(r#"{"a": {"duration": -1}}"#, 16_000, 1).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.json");
        std::fs::write(&path, r#"{"a": {"duration": 10}}"#).unwrap();

        let handle = CatalogHandle::open(&path, 16_000).await.unwrap();
        let before = handle.snapshot();

        std::fs::write(&path, r#"{"a": {"duration": 10}, "b": {"duration": 5}}"#).unwrap();
        assert_eq!(handle.reload().await.unwrap(), 2);

        assert_eq!(before.len(), 1);
        assert_eq!(handle.snapshot().len(), 2);

        std::fs::write(&path, "not json").unwrap();
        assert!(handle.reload().await.is_err());
        assert_eq!(handle.snapshot().version(), 2);
    }
}
