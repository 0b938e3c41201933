//! Types d'erreurs du cache de pistes

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Erreurs pouvant survenir lors de l'accès au blob store ou au disque local
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requête HTTP échouée (réseau, timeout, corps interrompu)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur d'entrée/sortie locale
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// L'objet n'existe pas dans le blob store
    #[error("Object not found in blob store: {0}")]
    NotFound(String),

    /// Statut HTTP inattendu
    #[error("Blob store returned {status} for {id}")]
    Status { id: String, status: u16 },

    /// Toutes les tentatives de téléchargement ont échoué
    #[error("Download of {id} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        id: String,
        attempts: u32,
        last: String,
    },
}

impl Error {
    /// Indique si une nouvelle tentative a une chance d'aboutir
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Io(_) => true,
            Error::Status { status, .. } => *status == 429 || *status >= 500,
            Error::NotFound(_) | Error::Exhausted { .. } => false,
        }
    }
}
