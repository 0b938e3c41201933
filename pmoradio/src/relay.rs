//! Processus externe de relais du direct
//!
//! Le relais (ffmpeg par défaut) lit la source du direct et écrit du MP3 sur
//! sa sortie standard. [`RelayProcess`] garantit que le processus ne survit
//! pas à son propriétaire : arrêt explicite via [`RelayProcess::shutdown`],
//! sinon `kill_on_drop`.

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// Marqueur remplacé par l'URL de la source dans les arguments
pub const URL_PLACEHOLDER: &str = "{url}";

/// Délai laissé au relais pour se terminer après fermeture de sa sortie
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Arguments ffmpeg : extraction audio, ré-encodage MP3 sur stdout
pub fn default_ffmpeg_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        URL_PLACEHOLDER,
        "-vn",
        "-acodec",
        "libmp3lame",
        "-b:a",
        "128k",
        "-f",
        "mp3",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Commande de relais paramétrable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RelayCommand {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: default_ffmpeg_args(),
        }
    }
}

impl RelayCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Arguments effectifs pour une source donnée
    pub fn args_for(&self, url: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(URL_PLACEHOLDER, url))
            .collect()
    }

    pub fn spawn(&self, url: &str) -> Result<RelayProcess> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Relay(format!("failed to spawn {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Relay("relay stdout not captured".into()))?;

        debug!(program = %self.program, pid = ?child.id(), "Relay process started");
        Ok(RelayProcess {
            child,
            stdout: Some(stdout),
        })
    }
}

/// Processus de relais en cours d'exécution
#[derive(Debug)]
pub struct RelayProcess {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl RelayProcess {
    /// Lit la sortie du relais ; `Ok(0)` signale la fin du flux
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf).await,
            None => Ok(0),
        }
    }

    /// Arrête le relais : fermeture de sa sortie, attente, puis kill
    pub async fn shutdown(mut self) {
        drop(self.stdout.take());

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Relay process exited"),
            Ok(Err(e)) => warn!("Failed to wait for relay process: {}", e),
            Err(_) => {
                debug!("Relay process still running, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill relay process: {}", e);
                }
            }
        }
    }
}
