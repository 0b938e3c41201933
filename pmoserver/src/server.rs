//! Serveur Axum construit par ajouts successifs de routes
//!
//! Les routes sont accumulées dans un `Router` partagé, puis figées au
//! démarrage : toute route doit être enregistrée avant [`Server::start`].

use crate::logs::{init_logging, log_dump, LogState};
use anyhow::{Context, Result};
use axum::handler::Handler;
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use pmoconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Identité du serveur, telle que journalisée au démarrage
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

pub struct Server {
    info: ServerInfo,
    router: Arc<RwLock<Router>>,
    local_addr: Option<SocketAddr>,
    serve_task: Option<JoinHandle<()>>,
    log_state: Option<LogState>,
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C reçu, arrêt gracieux");
}

impl Server {
    /// `base_url` n'est utilisé que pour l'affichage ; le serveur écoute sur toutes les interfaces
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                base_url: base_url.into(),
                http_port,
            },
            router: Arc::new(RwLock::new(Router::new())),
            local_addr: None,
            serve_task: None,
            log_state: None,
        }
    }

    pub fn new_configured() -> Self {
        ServerBuilder::new_configured().build()
    }

    /// Monte `route` à `path` ; `/` fusionne au lieu d'imbriquer
    async fn mount(&self, path: &str, route: Router) {
        let mut router = self.router.write().await;
        let current = std::mem::take(&mut *router);
        *router = match path {
            "/" => current.merge(route),
            _ => current.nest(path, route),
        };
    }

    /// GET `path` répond le JSON produit par `f`
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = Arc::clone(&f);
            async move { Json(f().await) }
        };
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// GET `path` servi par un handler Axum avec son état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Redirection 302 de `from` vers `to`
    pub async fn add_redirect(&mut self, from: &str, to: &str) {
        let location = to.to_string();
        let route = Router::new().route(
            "/",
            get(move || {
                let location = location.clone();
                async move { (StatusCode::FOUND, [(header::LOCATION, location)]) }
            }),
        );
        self.mount(from, route).await;
    }

    /// Copie du router courant (tests avec `tower::ServiceExt`)
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Ouvre le port et sert les routes enregistrées jusqu'à Ctrl+C
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.info.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let app = self.router().await;
        self.serve_task = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(ctrl_c())
                .await
            {
                error!("HTTP server error: {}", e);
            }
        }));

        info!(
            "Server {} running at http://{}:{}",
            self.info.name,
            self.info.base_url,
            local_addr.port()
        );
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Attend l'arrêt du serveur
    pub async fn wait(&mut self) {
        if let Some(task) = self.serve_task.take() {
            let _ = task.await;
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Initialise `tracing` depuis la configuration et expose `/log-dump`
    pub async fn init_logging(&mut self) {
        let log_state = init_logging();
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.log_state = Some(log_state);
    }
}

pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    /// Nom fixe, hôte et port lus dans `host.*`
    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new("PMO-Radio-Server", config.get_base_url(), config.get_http_port())
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}
