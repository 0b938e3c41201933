//! Détection du direct
//!
//! Le point de statut renvoie un document JSON ; les noms de champs varient
//! selon l'outil qui le publie, on accepte donc plusieurs alias. Toute erreur
//! (réseau, timeout, statut HTTP, JSON invalide) vaut « pas de direct » :
//! la radio retombe sur les archives.

use crate::error::Result;
use crate::settings::LiveSettings;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// État du direct au moment de la dernière interrogation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveStatus {
    pub active: bool,
    pub name: String,
    pub description: String,
    pub genres: Vec<String>,
    pub source_link: Option<String>,
}

fn first_str<'a>(doc: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| doc.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

impl LiveStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    /// Direct actif avec une source exploitable
    pub fn is_live(&self) -> bool {
        self.active && self.source_link.is_some()
    }

    /// Interprète un document de statut ; un champ attendu absent signifie « hors direct »
    pub fn from_json(doc: &Value) -> Self {
        let active = ["live", "active", "is_live"]
            .iter()
            .find_map(|k| doc.get(*k).and_then(Value::as_bool))
            .unwrap_or(false);

        let genres = match doc.get("genres").or_else(|| doc.get("genre")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let source_link = first_str(doc, &["link", "url", "source"]).map(str::to_string);

        Self {
            active: active && source_link.is_some(),
            name: first_str(doc, &["name", "title"]).unwrap_or_default().to_string(),
            description: first_str(doc, &["description"])
                .unwrap_or_default()
                .to_string(),
            genres,
            source_link,
        }
    }
}

/// Interroge périodiquement le point de statut du direct
pub struct LiveMonitor {
    client: Client,
    status_url: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    tx: watch::Sender<LiveStatus>,
}

impl LiveMonitor {
    pub fn new(settings: &LiveSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pmoradio/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (tx, _) = watch::channel(LiveStatus::offline());
        Ok(Self {
            client,
            status_url: settings.status_url.clone().filter(|u| !u.is_empty()),
            timeout: settings.timeout,
            poll_interval: settings.poll_interval.max(Duration::from_millis(100)),
            tx,
        })
    }

    /// Une interrogation ; ne renvoie jamais d'erreur
    pub async fn poll(&self) -> LiveStatus {
        let Some(url) = &self.status_url else {
            return LiveStatus::offline();
        };

        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(status = %r.status(), "Live status endpoint returned an error");
                return LiveStatus::offline();
            }
            Err(e) => {
                debug!("Live status request failed: {}", e);
                return LiveStatus::offline();
            }
        };

        match response.json::<Value>().await {
            Ok(doc) => LiveStatus::from_json(&doc),
            Err(e) => {
                debug!("Invalid live status document: {}", e);
                LiveStatus::offline()
            }
        }
    }

    /// Dernier statut publié
    pub fn current(&self) -> LiveStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.tx.subscribe()
    }

    fn publish(&self, status: LiveStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            match (current.is_live(), status.is_live()) {
                (false, true) => info!(name = %status.name, "Live broadcast started"),
                (true, false) => info!(name = %current.name, "Live broadcast ended"),
                _ => debug!("Live status updated"),
            }
            *current = status;
            true
        });
    }

    /// Interroge le statut une fois puis à chaque intervalle, jusqu'à annulation
    pub fn spawn_polling(self: Arc<Self>, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = tokio::select! {
                            _ = stop.cancelled() => break,
                            status = self.poll() => status,
                        };
                        self.publish(status);
                    }
                }
            }
            debug!("Live polling stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_aliases() {
        let status = LiveStatus::from_json(&json!({
            "is_live": true,
            "title": "Friday session",
            "genres": "house, techno ,",
            "url": "https://meshcast.example/stream"
        }));
        assert!(status.is_live());
        assert_eq!(status.name, "Friday session");
        assert_eq!(status.genres, vec!["house", "techno"]);
    }

    #[test]
    fn test_missing_fields_mean_offline() {
        assert!(!LiveStatus::from_json(&json!({"name": "x"})).is_live());
        assert!(!LiveStatus::from_json(&json!({"live": true})).is_live());
        assert!(!LiveStatus::from_json(&json!({"live": "yes", "link": "x"})).is_live());
        assert!(!LiveStatus::from_json(&json!([1, 2])).is_live());
    }

    #[tokio::test]
    async fn test_no_endpoint_is_offline() {
        let monitor = LiveMonitor::new(&LiveSettings::default()).unwrap();
        assert_eq!(monitor.poll().await, LiveStatus::offline());
    }

    #[tokio::test]
    async fn test_publish_only_on_change() {
        let monitor = LiveMonitor::new(&LiveSettings::default()).unwrap();
        let mut rx = monitor.subscribe();

        monitor.publish(LiveStatus::offline());
        assert!(!rx.has_changed().unwrap());

        let live = LiveStatus {
            active: true,
            source_link: Some("http://live".into()),
            ..Default::default()
        };
        monitor.publish(live.clone());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), live);
        assert!(monitor.current().is_live());
    }
}
