//! # pmoserver - Serveur HTTP de PMORadio
//!
//! Enveloppe légère autour d'Axum : les crates métier y greffent leurs
//! routes via des traits d'extension (`RadioServerExt` dans `pmoradio`),
//! puis le binaire démarre le serveur et attend Ctrl+C.
//!
//! Le module [`logs`] installe le subscriber `tracing` à partir de la
//! section `host.logger` de la configuration et garde les dernières
//! entrées en mémoire pour `GET /log-dump`.
//!
//! ```rust,no_run
//! use pmoserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_logging().await;
//!     server
//!         .add_route("/health", || async { serde_json::json!({"ok": true}) })
//!         .await;
//!     server.start().await.expect("cannot bind HTTP port");
//!     server.wait().await;
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{log_dump, LogState};
pub use server::{Server, ServerBuilder, ServerInfo};
