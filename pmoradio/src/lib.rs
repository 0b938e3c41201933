//! # pmoradio - Moteur de radio programmée sur l'heure murale
//!
//! La piste diffusée est une fonction pure de l'heure : le catalogue est joué
//! en boucle, chaque passage dans un ordre mélangé de façon déterministe.
//! Deux instances, ou une instance redémarrée, diffusent la même chose au
//! même moment sans état persistant.
//!
//! ## Composants
//!
//! - [`Catalog`] / [`CatalogHandle`] : instantanés immuables du catalogue
//! - [`Scheduler`] : heure → (piste, décalage, itération)
//! - [`pmocache::TrackCache`] : fichiers locaux de la piste courante et des suivantes
//! - [`LiveMonitor`] : détection du direct
//! - [`PlaybackPipeline`] : lecture cadencée des archives ou relais du direct
//! - [`Broadcaster`] : un flux, N auditeurs, files bornées
//! - [`Radio`] : façade (`get_current`, `stream`, `is_live`)
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use pmoradio::{Radio, RadioSettings};
//!
//! # async fn demo() -> pmoradio::Result<()> {
//! let radio = Radio::start(RadioSettings::default()).await?;
//! let current = radio.get_current()?;
//! println!("{} @ {:.1}s", current.title, current.offset_seconds);
//!
//! let mut listener = radio.stream();
//! while let Some(Ok(chunk)) = listener.next().await {
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod catalog;
pub mod error;
pub mod live;
pub mod pacing;
pub mod pipeline;
pub mod radio;
pub mod relay;
pub mod scheduler;
pub mod settings;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

pub use broadcaster::{BroadcastConfig, Broadcaster, ClientStream};
pub use catalog::{Catalog, CatalogHandle, Track};
pub use error::{Error, Result};
pub use live::{LiveMonitor, LiveStatus};
pub use pacing::Pacer;
pub use pipeline::{ChunkSource, NowPlaying, PlaybackPipeline};
pub use radio::{CurrentTrack, Radio, RadioParts};
pub use relay::{RelayCommand, RelayProcess};
pub use scheduler::{Clock, Resolution, Scheduler, SystemClock};
pub use settings::{
    CacheSettings, CatalogSettings, LiveSettings, RadioSettings, StreamSettings,
};

#[cfg(feature = "pmoconfig")]
pub use config_ext::RadioConfigExt;

#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::RadioServerExt;
