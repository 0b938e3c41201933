//! Pipeline de lecture : archives cadencées ou relais du direct
//!
//! Une seule instance tourne, quel que soit le nombre d'auditeurs. Elle
//! alterne entre deux états :
//!
//! - **Archive** : la piste courante est résolue par le [`Scheduler`], rendue
//!   locale par le [`TrackCache`], puis lue à partir du décalage programmé,
//!   au rythme réel de son débit.
//! - **Live** : un processus de relais lit la source du direct et ses octets
//!   sont transmis tels quels.
//!
//! Une erreur pendant une itération (fichier manquant, téléchargement
//! impossible, relais interrompu) est journalisée et la boucle reprend après
//! une courte pause ; le pipeline ne s'arrête que sur annulation ou quand
//! plus personne ne consomme ses chunks.

use crate::catalog::CatalogHandle;
use crate::error::{Error, Result};
use crate::live::LiveStatus;
use crate::pacing::Pacer;
use crate::relay::RelayCommand;
use crate::scheduler::{Clock, Resolution, Scheduler, SystemClock};
use crate::settings::StreamSettings;
use async_trait::async_trait;
use bytes::Bytes;
use pmocache::TrackCache;
use serde::Serialize;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sous ce reste, la piste est considérée comme terminée
pub const END_EPSILON_SECS: f64 = 0.5;

/// Pause après une itération en erreur
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Après un échec du relais, le direct est ignoré pendant ce délai
const LIVE_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Marge ajoutée à l'attente de fin de piste avant de re-résoudre
const TRACK_SWITCH_MARGIN: Duration = Duration::from_millis(50);

/// Producteur abstrait de chunks consommé par le [`crate::Broadcaster`]
#[async_trait]
pub trait ChunkSource: Send + 'static {
    /// Produit des chunks sur `tx` jusqu'à annulation ou fermeture du canal
    async fn run(self: Box<Self>, tx: mpsc::Sender<Bytes>, stop: CancellationToken);
}

/// Ce que le pipeline diffuse en ce moment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NowPlaying {
    Idle,
    Archive {
        track_id: String,
        title: String,
        iteration: u64,
    },
    Live(LiveStatus),
}

enum Flow {
    Continue,
    Stop,
}

/// Dernière position émise d'une piste d'archive
///
/// Le préchargement met la lecture en avance sur la programmation : en
/// revenant sur la même piste de la même itération, on repart de cette
/// position plutôt que du décalage programmé.
#[derive(Debug, Clone, PartialEq)]
struct Emitted {
    track_id: String,
    iteration: u64,
    next_byte: u64,
}

impl Emitted {
    fn resume_offset(emitted: Option<&Emitted>, resolution: &Resolution) -> u64 {
        let scheduled = resolution.byte_offset();
        match emitted {
            Some(e)
                if e.track_id == resolution.current.id && e.iteration == resolution.iteration =>
            {
                scheduled.max(e.next_byte)
            }
            _ => scheduled,
        }
    }
}

async fn pause(stop: &CancellationToken, delay: Duration) -> Flow {
    tokio::select! {
        _ = stop.cancelled() => Flow::Stop,
        _ = tokio::time::sleep(delay) => Flow::Continue,
    }
}

async fn send(tx: &mpsc::Sender<Bytes>, chunk: Bytes, stop: &CancellationToken) -> Flow {
    tokio::select! {
        _ = stop.cancelled() => Flow::Stop,
        sent = tx.send(chunk) => match sent {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop,
        },
    }
}

pub struct PlaybackPipeline {
    catalog: Arc<CatalogHandle>,
    scheduler: Arc<Scheduler>,
    cache: Arc<TrackCache>,
    live: watch::Receiver<LiveStatus>,
    relay: RelayCommand,
    clock: Arc<dyn Clock>,
    stream: StreamSettings,
    prefetch_depth: usize,
    now_playing: watch::Sender<NowPlaying>,
    live_retry_at: Option<Instant>,
    emitted: Option<Emitted>,
}

impl PlaybackPipeline {
    pub fn new(
        catalog: Arc<CatalogHandle>,
        scheduler: Arc<Scheduler>,
        cache: Arc<TrackCache>,
        live: watch::Receiver<LiveStatus>,
        stream: StreamSettings,
    ) -> Self {
        let (now_playing, _) = watch::channel(NowPlaying::Idle);
        Self {
            catalog,
            scheduler,
            cache,
            live,
            relay: RelayCommand::default(),
            clock: Arc::new(SystemClock),
            stream,
            prefetch_depth: 1,
            now_playing,
            live_retry_at: None,
            emitted: None,
        }
    }

    pub fn with_relay(mut self, relay: RelayCommand) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = depth;
        self
    }

    /// Suivi de ce qui est diffusé
    pub fn now_playing(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing.subscribe()
    }

    fn publish(&self, playing: NowPlaying) {
        self.now_playing.send_if_modified(|current| {
            if *current == playing {
                false
            } else {
                *current = playing;
                true
            }
        });
    }

    fn in_live_backoff(&self) -> bool {
        self.live_retry_at
            .is_some_and(|retry_at| Instant::now() < retry_at)
    }

    fn should_go_live(&self) -> bool {
        self.live.borrow().is_live() && !self.in_live_backoff()
    }

    /// Attend que la programmation passe à la piste suivante
    async fn wait_for_track_end(&self, remaining_seconds: f64, stop: &CancellationToken) -> Flow {
        let wait = Duration::from_secs_f64(remaining_seconds.max(0.0)) + TRACK_SWITCH_MARGIN;
        pause(stop, wait.min(self.stream.resolve_interval)).await
    }

    async fn play_archive(
        &mut self,
        pacer: &mut Pacer,
        tx: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<Flow> {
        let catalog = self.catalog.snapshot();
        let resolution = self.scheduler.resolve(&catalog, self.clock.now())?;
        let track = resolution.current.clone();
        let plan = resolution.cache_plan(self.prefetch_depth);

        let path = tokio::select! {
            _ = stop.cancelled() => return Ok(Flow::Stop),
            ensured = self.cache.apply(&plan) => ensured
                .map_err(|e| Error::TrackUnavailable(format!("{}: {}", track.id, e)))?,
        };

        self.publish(NowPlaying::Archive {
            track_id: track.id.clone(),
            title: track.title.clone(),
            iteration: resolution.iteration,
        });

        let mut file = tokio::fs::File::open(&path).await?;
        let file_len = file.metadata().await?.len();
        let offset = Emitted::resume_offset(self.emitted.as_ref(), &resolution);
        if offset >= file_len {
            debug!(id = %track.id, offset, file_len, "Nothing left to play in this track");
            pacer.rebase();
            return Ok(self
                .wait_for_track_end(resolution.remaining_seconds, stop)
                .await);
        }
        file.seek(SeekFrom::Start(offset)).await?;

        info!(
            id = %track.id,
            title = %track.title,
            offset_seconds = resolution.offset_seconds,
            iteration = resolution.iteration,
            "Playing archive track"
        );

        let mut emitted = Emitted {
            track_id: track.id.clone(),
            iteration: resolution.iteration,
            next_byte: offset,
        };
        let mut buf = vec![0u8; self.stream.chunk_size.max(1)];
        let mut remaining = resolution.remaining_seconds;
        let mut checked_at = Instant::now();

        loop {
            let since_check = checked_at.elapsed();
            if remaining - since_check.as_secs_f64() < END_EPSILON_SECS {
                pacer.rebase();
                return Ok(self
                    .wait_for_track_end(remaining - since_check.as_secs_f64(), stop)
                    .await);
            }

            if since_check >= self.stream.resolve_interval {
                if self.should_go_live() {
                    return Ok(Flow::Continue);
                }
                let catalog = self.catalog.snapshot();
                match self.scheduler.resolve(&catalog, self.clock.now()) {
                    Ok(r) if r.current.id != track.id => {
                        debug!(from = %track.id, to = %r.current.id, "Schedule moved on");
                        return Ok(Flow::Continue);
                    }
                    Ok(r) => remaining = r.remaining_seconds,
                    Err(e) => {
                        warn!("Re-resolution failed, keeping current track: {}", e);
                        remaining -= since_check.as_secs_f64();
                    }
                }
                checked_at = Instant::now();
            }

            let n = tokio::select! {
                _ = stop.cancelled() => return Ok(Flow::Stop),
                read = file.read(&mut buf) => read?,
            };
            if n == 0 {
                debug!(id = %track.id, "End of file");
                pacer.rebase();
                let left = remaining - checked_at.elapsed().as_secs_f64();
                return Ok(self.wait_for_track_end(left, stop).await);
            }

            if let Flow::Stop = send(tx, Bytes::copy_from_slice(&buf[..n]), stop).await {
                return Ok(Flow::Stop);
            }
            emitted.next_byte += n as u64;
            self.emitted = Some(emitted.clone());
            tokio::select! {
                _ = stop.cancelled() => return Ok(Flow::Stop),
                _ = pacer.pace(n, track.byte_rate) => {}
            }
        }
    }

    async fn play_live(
        &mut self,
        status: &LiveStatus,
        tx: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<Flow> {
        let Some(link) = status.source_link.clone() else {
            return Ok(Flow::Continue);
        };

        let mut relay = match self.relay.spawn(&link) {
            Ok(relay) => relay,
            Err(e) => {
                self.live_retry_at = Some(Instant::now() + LIVE_RETRY_BACKOFF);
                return Err(e);
            }
        };
        info!(name = %status.name, url = %link, "Relaying live broadcast");
        self.publish(NowPlaying::Live(status.clone()));

        let mut buf = vec![0u8; self.stream.chunk_size.max(1)];
        let mut checked_at = Instant::now();

        let outcome = loop {
            if checked_at.elapsed() >= self.stream.resolve_interval {
                let current = self.live.borrow().clone();
                if !current.is_live() || current.source_link.as_deref() != Some(link.as_str()) {
                    info!("Live broadcast ended, back to archives");
                    break Ok(Flow::Continue);
                }
                checked_at = Instant::now();
            }

            let read = tokio::select! {
                _ = stop.cancelled() => break Ok(Flow::Stop),
                read = tokio::time::timeout(self.stream.resolve_interval, relay.read(&mut buf)) => read,
            };
            match read {
                // Pas de données dans l'intervalle : on revérifie le statut
                Err(_) => continue,
                Ok(Ok(0)) => {
                    warn!(url = %link, "Relay process ended");
                    self.live_retry_at = Some(Instant::now() + LIVE_RETRY_BACKOFF);
                    break Ok(Flow::Continue);
                }
                Ok(Ok(n)) => {
                    if let Flow::Stop = send(tx, Bytes::copy_from_slice(&buf[..n]), stop).await {
                        break Ok(Flow::Stop);
                    }
                }
                Ok(Err(e)) => {
                    self.live_retry_at = Some(Instant::now() + LIVE_RETRY_BACKOFF);
                    break Err(Error::Relay(format!("read failed: {}", e)));
                }
            }
        };

        relay.shutdown().await;
        outcome
    }
}

#[async_trait]
impl ChunkSource for PlaybackPipeline {
    async fn run(self: Box<Self>, tx: mpsc::Sender<Bytes>, stop: CancellationToken) {
        let mut this = *self;
        let mut pacer = Pacer::new(this.stream.preroll_chunks);
        info!("Playback pipeline started");

        loop {
            if stop.is_cancelled() || tx.is_closed() {
                break;
            }

            let status = this.live.borrow().clone();
            let result = if status.is_live() && !this.in_live_backoff() {
                let result = this.play_live(&status, &tx, &stop).await;
                pacer.rebase();
                result
            } else {
                this.play_archive(&mut pacer, &tx, &stop).await
            };

            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Playback error: {}", e);
                    } else {
                        error!("Playback error: {}", e);
                    }
                    pacer.rebase();
                    if let Flow::Stop = pause(&stop, RETRY_DELAY).await {
                        break;
                    }
                }
            }
        }

        this.publish(NowPlaying::Idle);
        info!("Playback pipeline stopped");
    }
}
