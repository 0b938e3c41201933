//! Accès au blob store distant (stockage objet adressé par identifiant)
//!
//! Le stockage n'est connu qu'à travers trois opérations : `GET <id>`,
//! `PUT <id>` avec une classe de stockage, et `HEAD <id>`. Aucun format
//! d'authentification n'est imposé ; [`HttpBlobStore`] cible un bucket
//! public exposé en HTTP(S) (CDN type S3/Spaces).

use crate::download::write_response;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Délai maximal par défaut d'un téléchargement d'objet, en secondes
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Extension par défaut des objets
pub const DEFAULT_EXTENSION: &str = "mp3";

/// Header utilisé pour transmettre la classe de stockage lors d'un PUT
pub const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";

/// Blob store distant, adressé par identifiant de piste
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Télécharge l'objet `id` dans le fichier `dest`
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant de la piste
    /// * `dest` - Fichier de destination, créé ou écrasé
    ///
    /// # Returns
    ///
    /// Le nombre d'octets écrits, ou [`Error::NotFound`] si l'objet n'existe pas.
    async fn fetch(&self, id: &str, dest: &Path) -> Result<u64>;

    /// Dépose un objet
    ///
    /// # Arguments
    ///
    /// * `id` - Identifiant de la piste
    /// * `data` - Contenu complet de l'objet
    /// * `storage_class` - Classe de stockage demandée (`STANDARD`, ...)
    async fn put(&self, id: &str, data: Bytes, storage_class: &str) -> Result<()>;

    /// Vérifie l'existence d'un objet
    ///
    /// # Returns
    ///
    /// `true` si l'objet existe, `false` sur un 404.
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// Implémentation HTTP : `<base_url>/<id>.<extension>`
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    extension: String,
    timeout: Duration,
}

impl HttpBlobStore {
    /// Crée un client avec les réglages par défaut
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .user_agent(concat!("pmocache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            timeout,
        })
    }

    /// Partage un pool de connexions existant
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL complète d'un objet
    pub fn object_url(&self, id: &str) -> String {
        if self.extension.is_empty() {
            format!("{}/{}", self.base_url, id)
        } else {
            format!("{}/{}.{}", self.base_url, id, self.extension)
        }
    }

    fn check_status(id: &str, status: StatusCode) -> Result<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Status {
                id: id.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, id: &str, dest: &Path) -> Result<u64> {
        let url = self.object_url(id);
        debug!(%url, "Fetching object");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?;
        Self::check_status(id, response.status())?;

        write_response(response, dest).await
    }

    async fn put(&self, id: &str, data: Bytes, storage_class: &str) -> Result<()> {
        let url = self.object_url(id);
        debug!(%url, size = data.len(), storage_class, "Uploading object");

        let response = self
            .client
            .put(&url)
            .timeout(self.timeout)
            .header(STORAGE_CLASS_HEADER, storage_class)
            .body(data)
            .send()
            .await?;
        Self::check_status(id, response.status())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.object_url(id))
            .timeout(self.timeout)
            .send()
            .await?;
        match Self::check_status(id, response.status()) {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let store = HttpBlobStore::new("https://cdn.example.com/radio/").unwrap();
        assert_eq!(
            store.object_url("abc123"),
            "https://cdn.example.com/radio/abc123.mp3"
        );

        let raw = store.with_extension("");
        assert_eq!(raw.object_url("abc123"), "https://cdn.example.com/radio/abc123");
    }

    #[test]
    fn test_transient_classification() {
        let server_error = Error::Status {
            id: "a".into(),
            status: 503,
        };
        let client_error = Error::Status {
            id: "a".into(),
            status: 403,
        };
        assert!(server_error.is_transient());
        assert!(!client_error.is_transient());
        assert!(!Error::NotFound("a".into()).is_transient());
    }
}
