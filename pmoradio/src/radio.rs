//! Façade de la radio : assemblage des composants et opérations exposées
//! à la couche HTTP.

use crate::broadcaster::{BroadcastConfig, Broadcaster, ClientStream};
use crate::catalog::{Catalog, CatalogHandle};
use crate::error::Result;
use crate::live::{LiveMonitor, LiveStatus};
use crate::pipeline::{NowPlaying, PlaybackPipeline};
use crate::relay::RelayCommand;
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::settings::RadioSettings;
use chrono::{DateTime, Utc};
use pmocache::{HttpBlobStore, TrackCache};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Piste programmée à un instant donné
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentTrack {
    pub track_id: String,
    pub title: String,
    pub description: String,
    pub offset_seconds: f64,
    pub duration_seconds: f64,
    pub byte_rate: u64,
    pub iteration: u64,
}

/// Composants déjà construits, pour assembler une radio sans réseau
pub struct RadioParts {
    pub catalog: Arc<CatalogHandle>,
    pub cache: Arc<TrackCache>,
    pub live: Arc<LiveMonitor>,
    pub clock: Arc<dyn Clock>,
    pub settings: RadioSettings,
}

pub struct Radio {
    catalog: Arc<CatalogHandle>,
    scheduler: Arc<Scheduler>,
    cache: Arc<TrackCache>,
    live: Arc<LiveMonitor>,
    clock: Arc<dyn Clock>,
    broadcaster: Broadcaster,
    now_playing: watch::Receiver<NowPlaying>,
    stop: CancellationToken,
    poller: JoinHandle<()>,
    settings: RadioSettings,
}

impl Radio {
    /// Démarre la radio : catalogue, cache vidé, surveillance du direct, pipeline
    pub async fn start(settings: RadioSettings) -> Result<Self> {
        let catalog = Arc::new(
            CatalogHandle::open(&settings.catalog.path, settings.catalog.default_byte_rate).await?,
        );

        let store = HttpBlobStore::new(&settings.cache.blob_base_url)?
            .with_extension(&settings.cache.extension)
            .with_timeout(settings.cache.blob_timeout);
        let cache = TrackCache::new(
            &settings.cache.directory,
            Arc::new(store),
            settings.cache.retry,
        )?
        .with_extension(&settings.cache.extension);
        cache.clear().await?;

        let live = Arc::new(LiveMonitor::new(&settings.live)?);

        Ok(Self::assemble(RadioParts {
            catalog,
            cache: Arc::new(cache),
            live,
            clock: Arc::new(SystemClock),
            settings,
        }))
    }

    /// Assemble et démarre la radio à partir de composants existants
    pub fn assemble(parts: RadioParts) -> Self {
        let RadioParts {
            catalog,
            cache,
            live,
            clock,
            settings,
        } = parts;

        let stop = CancellationToken::new();
        let scheduler = Arc::new(Scheduler::new(settings.epoch));
        let poller = live.clone().spawn_polling(stop.child_token());

        let relay = RelayCommand::new(
            settings.live.relay_program.clone(),
            settings.live.relay_args.clone(),
        );
        let pipeline = PlaybackPipeline::new(
            catalog.clone(),
            scheduler.clone(),
            cache.clone(),
            live.subscribe(),
            settings.stream.clone(),
        )
        .with_relay(relay)
        .with_clock(clock.clone())
        .with_prefetch_depth(settings.cache.prefetch_depth);
        let now_playing = pipeline.now_playing();

        let broadcaster =
            Broadcaster::start(Box::new(pipeline), BroadcastConfig::from(&settings.stream));

        info!(epoch = %settings.epoch, "Radio started");
        Self {
            catalog,
            scheduler,
            cache,
            live,
            clock,
            broadcaster,
            now_playing,
            stop,
            poller,
            settings,
        }
    }

    /// Piste programmée maintenant (indépendamment du direct)
    pub fn get_current(&self) -> Result<CurrentTrack> {
        self.get_current_at(self.clock.now())
    }

    pub fn get_current_at(&self, now: DateTime<Utc>) -> Result<CurrentTrack> {
        let catalog = self.catalog.snapshot();
        let r = self.scheduler.resolve(&catalog, now)?;
        Ok(CurrentTrack {
            track_id: r.current.id.clone(),
            title: r.current.title.clone(),
            description: r.current.description.clone(),
            offset_seconds: r.offset_seconds,
            duration_seconds: r.current.duration_seconds,
            byte_rate: r.current.byte_rate,
            iteration: r.iteration,
        })
    }

    /// Nouveau flux d'auditeur
    pub fn stream(&self) -> ClientStream {
        self.broadcaster.connect()
    }

    /// Statut du direct s'il est actif
    pub fn is_live(&self) -> Option<LiveStatus> {
        Some(self.live.current()).filter(LiveStatus::is_live)
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.now_playing.borrow().clone()
    }

    pub fn listeners(&self) -> usize {
        self.broadcaster.client_count()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.snapshot()
    }

    /// Relit le catalogue ; la programmation suit le nouvel instantané
    pub async fn reload_catalog(&self) -> Result<u64> {
        self.catalog.reload().await
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        &self.cache
    }

    pub fn settings(&self) -> &RadioSettings {
        &self.settings
    }

    pub async fn shutdown(&self) {
        self.stop.cancel();
        self.broadcaster.shutdown().await;
        self.poller.abort();
        info!("Radio stopped");
    }
}
