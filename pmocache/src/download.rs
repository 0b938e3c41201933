//! Téléchargement d'objets vers le disque local
//!
//! Un téléchargement écrit d'abord dans `<fichier>.part` puis renomme le
//! fichier une fois complet : un lecteur ne voit jamais de fichier partiel
//! sous le nom définitif.

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Suffixe des fichiers en cours de téléchargement
pub const PARTIAL_SUFFIX: &str = "part";

/// Politique de nouvelle tentative avec backoff exponentiel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Nombre total de tentatives (au moins 1)
    pub max_attempts: u32,
    /// Délai de base : l'attente après la tentative `n` vaut `base_delay * 2^n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Délai à attendre après l'échec de la tentative `attempt` (1-indexée)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Chemin temporaire associé à un fichier de destination
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Écrit le corps d'une réponse HTTP dans `dest` en streaming
pub(crate) async fn write_response(response: reqwest::Response, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(total)
}

/// Télécharge `id` vers `dest` via un fichier `.part` renommé en fin de transfert
pub async fn download_to(store: &dyn BlobStore, id: &str, dest: &Path) -> Result<u64> {
    let partial = partial_path(dest);

    match store.fetch(id, &partial).await {
        Ok(size) => {
            tokio::fs::rename(&partial, dest).await?;
            Ok(size)
        }
        Err(e) => {
            // Le fichier partiel peut ne pas exister si l'erreur précède sa création
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

/// Télécharge `id` en réessayant les échecs transitoires selon `policy`
pub async fn download_with_retry(
    store: &dyn BlobStore,
    id: &str,
    dest: &Path,
    policy: RetryPolicy,
) -> Result<u64> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match download_to(store, id, dest).await {
            Ok(size) => {
                debug!(id, size, attempt, "Download complete");
                return Ok(size);
            }
            Err(e) if !e.is_transient() => {
                warn!(id, attempt, "Download failed permanently: {}", e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(id, attempt, "Download failed, giving up: {}", e);
                return Err(Error::Exhausted {
                    id: id.to_string(),
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    id,
                    attempt,
                    "Download failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/cache/abc.mp3")),
            PathBuf::from("/tmp/cache/abc.mp3.part")
        );
    }
}
