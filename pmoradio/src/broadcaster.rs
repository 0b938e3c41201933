//! Diffusion d'un flux unique vers N auditeurs
//!
//! Une tâche productrice draine la [`ChunkSource`] et copie chaque chunk dans
//! la file bornée de chaque client. Le verrou du registre n'est tenu que le
//! temps de copier la liste des clients ; les envois (`try_send`) ont lieu
//! hors verrou et ne bloquent jamais : un client lent perd des chunks, puis
//! est déconnecté après `max_strikes` envois consécutifs sur file pleine.
//!
//! Un nouveau client reçoit d'abord les derniers chunks émis (backlog), pour
//! démarrer sans silence.

use crate::pipeline::ChunkSource;
use crate::settings::StreamSettings;
use bytes::Bytes;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacité du canal entre la source et le producteur
const SOURCE_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub client_queue: usize,
    pub backlog_chunks: usize,
    pub max_strikes: u32,
    pub idle_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for BroadcastConfig {
    fn from(stream: &StreamSettings) -> Self {
        Self {
            client_queue: stream.client_queue,
            backlog_chunks: stream.backlog_chunks,
            max_strikes: stream.max_strikes,
            idle_timeout: stream.client_idle_timeout,
        }
    }
}

struct ClientSlot {
    tx: mpsc::Sender<Bytes>,
    strikes: Arc<AtomicU32>,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<u64, ClientSlot>,
    backlog: VecDeque<Bytes>,
}

struct Inner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    chunks: AtomicU64,
    config: BroadcastConfig,
}

impl Inner {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        self.registry().clients.remove(&id).is_some()
    }

    /// Copie un chunk vers tous les clients enregistrés
    fn dispatch(&self, chunk: Bytes) {
        let targets: Vec<(u64, mpsc::Sender<Bytes>, Arc<AtomicU32>)> = {
            let mut registry = self.registry();
            if self.config.backlog_chunks > 0 {
                if registry.backlog.len() >= self.config.backlog_chunks {
                    registry.backlog.pop_front();
                }
                registry.backlog.push_back(chunk.clone());
            }
            registry
                .clients
                .iter()
                .map(|(id, slot)| (*id, slot.tx.clone(), slot.strikes.clone()))
                .collect()
        };
        self.chunks.fetch_add(1, Ordering::Relaxed);

        let mut dead = Vec::new();
        for (id, tx, strikes) in targets {
            match tx.try_send(chunk.clone()) {
                Ok(()) => strikes.store(0, Ordering::Relaxed),
                Err(TrySendError::Full(_)) => {
                    let count = strikes.fetch_add(1, Ordering::Relaxed) + 1;
                    if count >= self.config.max_strikes {
                        warn!(client = id, "Client too slow, disconnecting");
                        dead.push(id);
                    }
                }
                Err(TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut registry = self.registry();
            for id in dead {
                registry.clients.remove(&id);
            }
        }
    }
}

/// Diffuseur : une source, N clients
pub struct Broadcaster {
    inner: Arc<Inner>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Démarre la source et la tâche de diffusion
    pub fn start(source: Box<dyn ChunkSource>, config: BroadcastConfig) -> Self {
        let inner = Arc::new(Inner {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            chunks: AtomicU64::new(0),
            config,
        });
        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Bytes>(SOURCE_BUFFER);

        let source_task = tokio::spawn(source.run(tx, stop.child_token()));

        let producer_inner = inner.clone();
        let producer_stop = stop.clone();
        let producer_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = producer_stop.cancelled() => break,
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => producer_inner.dispatch(chunk),
                        None => {
                            info!("Chunk source ended");
                            break;
                        }
                    },
                }
            }
            // Les clients voient leur flux se terminer
            producer_inner.registry().clients.clear();
            debug!("Broadcast producer stopped");
        });

        Self {
            inner,
            stop,
            tasks: Mutex::new(vec![source_task, producer_task]),
        }
    }

    /// Enregistre un nouvel auditeur
    ///
    /// La file du client est pré-remplie avec le backlog, puis reçoit chaque
    /// nouveau chunk. Le flux retourné se termine quand la source s'arrête,
    /// quand le client est déconnecté pour lenteur, ou après `idle_timeout`
    /// sans données (erreur `TimedOut`).
    ///
    /// # Returns
    ///
    /// Un [`ClientStream`] qui se désinscrit du diffuseur quand il est relâché.
    pub fn connect(&self) -> ClientStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let config = &self.inner.config;
        let capacity = config.client_queue.max(config.backlog_chunks + 1).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let listeners = {
            let mut registry = self.inner.registry();
            for chunk in &registry.backlog {
                let _ = tx.try_send(chunk.clone());
            }
            if !self.stop.is_cancelled() {
                registry.clients.insert(
                    id,
                    ClientSlot {
                        tx,
                        strikes: Arc::new(AtomicU32::new(0)),
                    },
                );
            }
            registry.clients.len()
        };
        info!(client = id, listeners, "Listener connected");

        ClientStream {
            id,
            rx,
            inner: Arc::downgrade(&self.inner),
            idle_timeout: config.idle_timeout,
            idle: Box::pin(tokio::time::sleep(config.idle_timeout)),
            finished: false,
        }
    }

    /// Retire un auditeur ; son flux se termine une fois sa file vidée
    pub fn disconnect(&self, id: u64) -> bool {
        self.inner.remove(id)
    }

    pub fn client_count(&self) -> usize {
        self.inner.registry().clients.len()
    }

    /// Nombre total de chunks diffusés
    pub fn chunks_broadcast(&self) -> u64 {
        self.inner.chunks.load(Ordering::Relaxed)
    }

    /// Arrête la source et la diffusion, puis attend la fin des tâches
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        self.inner.registry().clients.clear();
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Flux d'un auditeur
///
/// Se termine quand l'auditeur est retiré ou que la diffusion s'arrête ;
/// produit une erreur `TimedOut` si aucun chunk n'arrive pendant
/// `idle_timeout`. Se désinscrit lorsqu'il est détruit.
pub struct ClientStream {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    inner: Weak<Inner>,
    idle_timeout: Duration,
    idle: Pin<Box<Sleep>>,
    finished: bool,
}

impl ClientStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn unregister(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.remove(self.id) {
                debug!(client = self.id, "Listener unregistered");
            }
        }
    }
}

impl Stream for ClientStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                let deadline = Instant::now() + this.idle_timeout;
                this.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.finished = true;
                    this.unregister();
                    warn!(client = this.id, "Listener starved, closing stream");
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no audio data received",
                    ))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.unregister();
        debug!(client = self.id, "Listener disconnected");
    }
}
