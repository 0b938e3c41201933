// logs.rs
use pmoconfig::get_config;

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    filter::LevelFilter,
    layer::{Context, Layer, SubscriberExt},
    reload,
    util::SubscriberInitExt,
    Registry,
};

/// Représente une entrée de log
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Buffer circulaire partagé
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
    reload_handle: Option<Arc<reload::Handle<LevelFilter, Registry>>>,
}

impl LogState {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            reload_handle: None,
        }
    }

    fn with_reload(mut self, handle: reload::Handle<LevelFilter, Registry>) -> Self {
        self.reload_handle = Some(Arc::new(handle));
        self
    }

    /// Change dynamiquement le niveau de log minimum
    pub fn set_max_level(&self, level: Level) {
        let Some(handle) = &self.reload_handle else {
            return;
        };
        if let Err(e) = handle.reload(LevelFilter::from_level(level)) {
            eprintln!("❌ Failed to reload log level filter: {}", e);
        }
    }

    fn push(&self, entry: LogEntry) {
        let mut buf = match self.buffer.write() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        match self.buffer.read() {
            Ok(buf) => buf.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

/// Layer `tracing` qui alimente le buffer circulaire
pub struct BufferLayer {
    state: LogState,
}

impl BufferLayer {
    pub fn new(state: LogState) -> Self {
        Self { state }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn into_message(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.state.push(LogEntry {
            timestamp: SystemTime::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.into_message(),
        });
    }
}

/// Handler pour GET /log-dump
pub async fn log_dump(State(state): State<LogState>) -> impl IntoResponse {
    Json(state.dump())
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Initialise le système de logging (buffer circulaire + console optionnelle)
///
/// Les options sont lues dans `host.logger` de la configuration.
/// Retourne le `LogState` qui peut être utilisé pour ajouter les routes de logging au serveur.
pub fn init_logging() -> LogState {
    let config = get_config();

    let log_level = string_to_level(&config.get_log_min_level())
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let (filter, reload_handle) = reload::Layer::new(log_level);

    let buffer_capacity = config.get_log_cache_size();
    let log_state = LogState::new(buffer_capacity).with_reload(reload_handle);

    // Le filtre rechargeable doit être appliqué avant les autres layers
    let subscriber = Registry::default()
        .with(filter)
        .with(BufferLayer::new(log_state.clone()));

    let enable_console = config.get_log_enable_console();

    let result = if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        eprintln!("⚠️ Logging already initialized: {}", e);
    }

    log_state
}
