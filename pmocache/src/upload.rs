//! Publication des fichiers locaux vers le blob store
//!
//! Utilisé par l'outillage d'import : chaque piste absente du bucket est
//! déposée avec la classe de stockage demandée.

use crate::blob::BlobStore;
use crate::error::Result;
use bytes::Bytes;
use std::path::Path;
use tracing::{info, warn};

/// Bilan d'une synchronisation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Dépose dans `store` chaque `<dir>/<id>.<extension>` dont l'objet n'existe pas encore
///
/// Une erreur sur une piste n'interrompt pas les suivantes.
pub async fn upload_missing<I, S>(
    store: &dyn BlobStore,
    dir: &Path,
    extension: &str,
    ids: I,
    storage_class: &str,
) -> Result<UploadReport>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = UploadReport::default();

    for id in ids {
        let id = id.as_ref();
        match store.exists(id).await {
            Ok(true) => {
                report.skipped.push(id.to_string());
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(id, "Existence check failed: {}", e);
                report.failed.push(id.to_string());
                continue;
            }
        }

        let path = dir.join(format!("{}.{}", id, extension));
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(id, path = %path.display(), "Cannot read local file: {}", e);
                report.failed.push(id.to_string());
                continue;
            }
        };

        match store.put(id, data, storage_class).await {
            Ok(()) => {
                info!(id, storage_class, "Uploaded");
                report.uploaded.push(id.to_string());
            }
            Err(e) => {
                warn!(id, "Upload failed: {}", e);
                report.failed.push(id.to_string());
            }
        }
    }

    Ok(report)
}
