//! Extension pmoserver pour la radio
//!
//! Routes créées :
//!
//! - `GET /stream` : flux `audio/mpeg` continu (un client du diffuseur)
//! - `GET /info` : piste programmée et état du direct
//! - `GET /live` : statut du direct, `null` hors direct
//! - `GET /` : redirection 302 vers la page de la radio

use crate::live::LiveStatus;
use crate::pipeline::NowPlaying;
use crate::radio::Radio;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Réponse de `/info`
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub now_playing: String,
    pub track_id: String,
    pub video_description: String,
    pub duration: f64,
    pub elapsed: f64,
    pub byte_rate: u64,
    pub live: Option<LiveStatus>,
    pub mode: NowPlaying,
    pub listeners: usize,
}

async fn stream_handler(State(radio): State<Arc<Radio>>) -> Response {
    let body = Body::from_stream(radio.stream());

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
    headers.insert(
        HeaderName::from_static("icy-name"),
        HeaderValue::from_static("PMO Radio"),
    );

    (StatusCode::OK, headers, body).into_response()
}

async fn info_handler(State(radio): State<Arc<Radio>>) -> Response {
    match radio.get_current() {
        Ok(current) => Json(InfoResponse {
            now_playing: current.title,
            track_id: current.track_id,
            video_description: current.description,
            duration: current.duration_seconds,
            elapsed: current.offset_seconds,
            byte_rate: current.byte_rate,
            live: radio.is_live(),
            mode: radio.now_playing(),
            listeners: radio.listeners(),
        })
        .into_response(),
        Err(e) => {
            warn!("Cannot resolve current track: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn live_handler(State(radio): State<Arc<Radio>>) -> Json<Option<LiveStatus>> {
    Json(radio.is_live())
}

/// Trait d'extension qui greffe la radio sur un [`pmoserver::Server`]
///
/// # Exemple
///
/// ```rust,no_run
/// # async fn demo(radio: std::sync::Arc<pmoradio::Radio>) {
/// use pmoradio::RadioServerExt;
///
/// let mut server = pmoserver::ServerBuilder::new_configured().build();
/// server.register_radio(radio, "https://radio.example.com").await;
/// server.start().await.ok();
/// # }
/// ```
pub trait RadioServerExt {
    /// Enregistre les routes de la radio sur le serveur
    ///
    /// Doit être appelé avant `Server::start` : le router est figé au démarrage.
    ///
    /// # Arguments
    ///
    /// * `radio` - Moteur radio partagé par tous les handlers
    /// * `redirect_url` - Cible de la redirection 302 servie sur `/`
    async fn register_radio(&mut self, radio: Arc<Radio>, redirect_url: &str);
}

impl RadioServerExt for pmoserver::Server {
    async fn register_radio(&mut self, radio: Arc<Radio>, redirect_url: &str) {
        self.add_handler_with_state("/stream", stream_handler, radio.clone())
            .await;
        self.add_handler_with_state("/info", info_handler, radio.clone())
            .await;
        self.add_handler_with_state("/live", live_handler, radio).await;
        self.add_redirect("/", redirect_url).await;
    }
}
