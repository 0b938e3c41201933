//! # pmocache - Cache local de pistes alimenté par un blob store
//!
//! Cette crate gère les fichiers audio nécessaires à la lecture :
//!
//! - [`BlobStore`] : accès au stockage distant (`GET`, `PUT`, `HEAD` par id)
//! - [`TrackCache`] : présence locale des pistes courantes et suivantes,
//!   téléchargements avec reprise, éviction des pistes jouées
//! - [`upload_missing`] : publication des fichiers locaux absents du bucket
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use pmocache::{CachePlan, HttpBlobStore, RetryPolicy, TrackCache};
//! use std::sync::Arc;
//!
//! # async fn demo() -> pmocache::Result<()> {
//! let store = Arc::new(HttpBlobStore::new("https://cdn.example.com/radio")?);
//! let cache = Arc::new(TrackCache::new("temp", store, RetryPolicy::default())?);
//! cache.clear().await?;
//!
//! let plan = CachePlan {
//!     current: "abc".into(),
//!     upcoming: vec!["def".into()],
//!     previous: None,
//! };
//! let path = cache.apply(&plan).await?;
//! println!("Playing from {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod cache;
pub mod download;
pub mod error;
pub mod upload;

pub use blob::{BlobStore, HttpBlobStore};
pub use cache::{CachePlan, TrackCache};
pub use download::RetryPolicy;
pub use error::{Error, Result};
pub use upload::{upload_missing, UploadReport};
