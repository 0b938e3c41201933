//! Cache local des pistes audio
//!
//! Le cache ne conserve que les quelques fichiers utiles à la lecture en
//! cours : la piste courante et les suivantes. Les pistes déjà jouées sont
//! supprimées dès qu'elles sortent de la fenêtre.
//!
//! ## Concurrence
//!
//! - Deux appels concurrents à [`TrackCache::ensure`] pour le même id ne
//!   déclenchent qu'un seul téléchargement.
//! - La suppression s'appuie sur la sémantique `unlink` POSIX : un lecteur
//!   qui a déjà ouvert le fichier continue de lire l'inode détaché.

use crate::blob::BlobStore;
use crate::download::{download_with_retry, RetryPolicy};
use crate::error::Result;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pistes nécessaires à un instant donné
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePlan {
    /// Piste en cours de lecture, requise immédiatement
    pub current: String,
    /// Pistes à précharger en arrière-plan, dans l'ordre de lecture
    pub upcoming: Vec<String>,
    /// Piste précédente, à supprimer
    pub previous: Option<String>,
}

impl CachePlan {
    /// Ids à conserver sur disque
    pub fn keep(&self) -> HashSet<String> {
        std::iter::once(self.current.clone())
            .chain(self.upcoming.iter().cloned())
            .collect()
    }
}

/// Cache disque des fichiers audio, alimenté par un [`BlobStore`]
pub struct TrackCache {
    dir: PathBuf,
    extension: String,
    store: Arc<dyn BlobStore>,
    policy: RetryPolicy,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for TrackCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackCache")
            .field("dir", &self.dir)
            .field("extension", &self.extension)
            .field("policy", &self.policy)
            .finish()
    }
}

impl TrackCache {
    /// Crée le cache dans `dir` (créé s'il n'existe pas)
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<dyn BlobStore>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            extension: "mp3".to_string(),
            store,
            policy,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Chemin local d'une piste (qu'elle soit présente ou non)
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, self.extension))
    }

    pub async fn is_cached(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(id))
            .await
            .unwrap_or(false)
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid track id: {:?}", id),
            )
            .into());
        }
        Ok(())
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        inflight
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release(&self, id: &str, lock: &Arc<AsyncMutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        // La map et l'appelant : plus personne n'attend ce verrou
        if Arc::strong_count(lock) <= 2 {
            inflight.remove(id);
        }
    }

    /// Garantit la présence locale d'une piste et retourne son chemin
    ///
    /// Un fichier déjà présent n'est jamais retéléchargé. Les échecs
    /// transitoires sont réessayés selon la [`RetryPolicy`] du cache.
    pub async fn ensure(&self, id: &str) -> Result<PathBuf> {
        Self::check_id(id)?;
        let path = self.path_for(id);
        if self.is_cached(id).await {
            return Ok(path);
        }

        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            if self.is_cached(id).await {
                debug!(id, "Track downloaded by a concurrent caller");
                Ok(path.clone())
            } else {
                info!(id, "Cache miss, downloading track");
                download_with_retry(self.store.as_ref(), id, &path, self.policy)
                    .await
                    .map(|_| path.clone())
            }
        };
        self.release(id, &lock);
        result
    }

    /// Lance le téléchargement d'une piste en arrière-plan
    ///
    /// Retourne `None` si la piste est déjà en cache.
    pub async fn prefetch(self: &Arc<Self>, id: &str) -> Option<JoinHandle<()>> {
        if self.is_cached(id).await {
            return None;
        }
        let cache = Arc::clone(self);
        let id = id.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = cache.ensure(&id).await {
                warn!(id = %id, "Prefetch failed: {}", e);
            }
        }))
    }

    /// Supprime une piste du cache
    ///
    /// Retourne `true` si un fichier a été supprimé. Une erreur de
    /// suppression est journalisée et n'interrompt rien.
    pub async fn evict(&self, id: &str) -> bool {
        if Self::check_id(id).is_err() {
            return false;
        }
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => {
                debug!(id, "Evicted track");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(id, "Failed to evict track: {}", e);
                false
            }
        }
    }

    /// Ids des pistes complètement téléchargées
    pub async fn cached_ids(&self) -> Result<Vec<String>> {
        let suffix = format!(".{}", self.extension);
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(&suffix) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Supprime toutes les pistes absentes de `keep`
    ///
    /// Les fichiers `.part` sont laissés aux téléchargements en cours.
    pub async fn retain(&self, keep: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for id in self.cached_ids().await? {
            if !keep.contains(&id) && self.evict(&id).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Vide entièrement le répertoire du cache (fichiers partiels compris)
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), "Failed to remove: {}", e),
            }
        }
        info!(dir = %self.dir.display(), removed, "Cache cleared");
        Ok(removed)
    }

    /// Applique un plan : piste courante, préchargement, éviction
    ///
    /// Dans l'ordre :
    /// 1. `ensure` sur la piste courante (attendu) ;
    /// 2. `prefetch` des pistes à venir (en tâche de fond) ;
    /// 3. éviction de la piste précédente si elle ne fait plus partie du plan ;
    /// 4. `retain` sur le plan, qui borne le cache à `1 + upcoming.len()` fichiers.
    ///
    /// # Arguments
    ///
    /// * `plan` - Fenêtre de pistes calculée par le programmateur
    ///
    /// # Returns
    ///
    /// Le chemin de la piste courante. Le préchargement et l'éviction ont
    /// lieu même si la piste courante est indisponible ; l'erreur de
    /// `ensure` est alors retournée.
    pub async fn apply(self: &Arc<Self>, plan: &CachePlan) -> Result<PathBuf> {
        let current = self.ensure(&plan.current).await;

        for id in &plan.upcoming {
            if id != &plan.current {
                self.prefetch(id).await;
            }
        }

        let keep = plan.keep();
        if let Some(previous) = &plan.previous {
            if !keep.contains(previous) {
                self.evict(previous).await;
            }
        }
        if let Err(e) = self.retain(&keep).await {
            warn!("Failed to scan cache directory: {}", e);
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Blob store en mémoire qui compte les téléchargements
    struct CountingStore {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn fetch(&self, id: &str, dest: &Path) -> Result<u64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if id == "missing" {
                return Err(Error::NotFound(id.to_string()));
            }
            tokio::fs::write(dest, id.as_bytes()).await?;
            Ok(id.len() as u64)
        }

        async fn put(&self, _id: &str, _data: Bytes, _class: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn cache(dir: &Path) -> (Arc<TrackCache>, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            fetches: AtomicUsize::new(0),
        });
        let cache = TrackCache::new(dir, store.clone(), RetryPolicy::default()).unwrap();
        (Arc::new(cache), store)
    }

    #[tokio::test]
    async fn test_concurrent_ensure_single_download() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, store) = cache(tmp.path());

        let (a, b) = tokio::join!(cache.ensure("abc"), cache.ensure("abc"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_track_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, store) = cache(tmp.path());

        let err = cache.ensure("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert!(!tmp.path().join("missing.mp3.part").exists());
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, store) = cache(tmp.path());

        assert!(cache.ensure("../etc/passwd").await.is_err());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_apply_keeps_window_only() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, _) = cache(tmp.path());
        for id in ["old1", "old2"] {
            std::fs::write(cache.path_for(id), b"x").unwrap();
        }

        let plan = CachePlan {
            current: "cur".into(),
            upcoming: vec!["next".into()],
            previous: Some("old1".into()),
        };
        let path = cache.apply(&plan).await.unwrap();
        assert_eq!(path, cache.path_for("cur"));

        // Laisser le préchargement se terminer
        cache.ensure("next").await.unwrap();
        assert_eq!(cache.cached_ids().await.unwrap(), vec!["cur", "next"]);
    }

    #[tokio::test]
    async fn test_prefetch_skips_cached_tracks() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, store) = cache(tmp.path());
        std::fs::write(cache.path_for("here"), b"x").unwrap();

        assert!(cache.prefetch("here").await.is_none());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);

        let handle = cache.prefetch("there").await.expect("download not started");
        handle.await.unwrap();
        assert!(cache.is_cached("there").await);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_partials() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, _) = cache(tmp.path());
        std::fs::write(cache.path_for("a"), b"x").unwrap();
        std::fs::write(tmp.path().join("b.mp3.part"), b"x").unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.cached_ids().await.unwrap().is_empty());
    }
}
