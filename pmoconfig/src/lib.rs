//! # pmoconfig - Configuration YAML de PMORadio
//!
//! La configuration est un arbre YAML construit en trois couches :
//!
//! 1. les valeurs par défaut embarquées (`pmoradio.yaml`) ;
//! 2. le fichier `config.yaml` du répertoire de configuration ;
//! 3. les variables `PMORADIO_CONFIG__SECTION__CLE=valeur`.
//!
//! L'arbre fusionné est réécrit dans `config.yaml` au chargement, puis à
//! chaque modification.
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let cache_dir = config.get_managed_dir(&["radio", "cache", "directory"], "temp")?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Les crates consommatrices (ex: `pmoradio`) ajoutent leurs propres getters
//! via un trait d'extension sur [`Config`] plutôt que de les coder ici.

mod tree;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use serde_yaml::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("pmoradio.yaml");

const ENV_CONFIG_DIR: &str = "PMORADIO_CONFIG";
const ENV_PREFIX: &str = "PMORADIO_CONFIG__";
const DIR_NAME: &str = ".pmoradio";
const FILE_NAME: &str = "config.yaml";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_BASE_URL: &str = "localhost";
const DEFAULT_LOG_BUFFER_CAPACITY: u64 = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMORadio configuration"));
}

/// Configuration partagée du processus
#[derive(Debug)]
pub struct Config {
    dir: PathBuf,
    file: PathBuf,
    data: Mutex<Value>,
}

/// Répertoire de configuration : argument, variable d'environnement,
/// `./.pmoradio`, `~/.pmoradio`, et à défaut `./.pmoradio` (créé)
fn locate_dir(directory: &str) -> PathBuf {
    if !directory.is_empty() {
        return PathBuf::from(directory);
    }
    if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
        info!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory from environment");
        return PathBuf::from(from_env);
    }

    let local = PathBuf::from(DIR_NAME);
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .map(|home| home.join(DIR_NAME))
        .filter(|p| p.exists())
        .unwrap_or(local)
}

/// Crée le répertoire au besoin et vérifie qu'il est accessible en écriture
fn prepare_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create config directory {}", dir.display()))?;
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }
    let probe = dir.join(".write_test");
    fs::write(&probe, b"")
        .with_context(|| format!("config directory {} is not writable", dir.display()))?;
    fs::remove_file(&probe)?;
    Ok(())
}

fn env_overrides(root: &mut Value) {
    for (name, raw) in env::vars() {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<&str> = path.split("__").collect();
        if let Err(e) = tree::assign(root, &segments, tree::parse_scalar(&raw)) {
            warn!(variable = %name, "Ignoring environment override: {}", e);
        }
    }
}

impl Config {
    /// Charge la configuration depuis `directory` (vide : recherche automatique)
    pub fn load_config(directory: &str) -> Result<Self> {
        let dir = locate_dir(directory);
        prepare_dir(&dir)?;
        let file = dir.join(FILE_NAME);
        info!(config_dir = %dir.display(), "Using config directory");

        let mut root: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read_to_string(&file) {
            Ok(text) => {
                info!(config_file = %file.display(), "Loaded config file");
                // Un fichier vide se lit comme `null` et ne change rien
                let external: Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("invalid YAML in {}", file.display()))?;
                tree::merge(&mut root, tree::lowercase_keys(external));
            }
            Err(_) => info!(config_file = %file.display(), "No config file, using defaults"),
        }
        let mut root = tree::lowercase_keys(root);
        env_overrides(&mut root);

        let config = Self {
            dir,
            file,
            data: Mutex::new(root),
        };
        config.save()?;
        Ok(config)
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Répertoire contenant `config.yaml`
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Réécrit `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.file, yaml)?;
        Ok(())
    }

    /// Valeur à `path` (ex: `&["host", "http_port"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        tree::lookup(&self.data(), path)
            .cloned()
            .ok_or_else(|| anyhow!("no configuration value at {}", path.join(".")))
    }

    /// Écrit une valeur puis sauvegarde le fichier
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        tree::assign(&mut self.data(), path, value)?;
        self.save()
    }

    /// Entier positif ; une chaîne numérique est acceptée (overrides d'env)
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.join("."), value = %s, "Invalid integer, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    pub fn get_f64_or(&self, path: &[&str], default: f64) -> f64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Chaîne non vide, sinon `default`
    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            Ok(Value::Number(n)) => n.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_bool_or(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            _ => default,
        }
    }

    /// Chemin absolu ; un chemin relatif part du répertoire de configuration
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    /// Répertoire désigné par `path`, créé si besoin
    ///
    /// Si la clé est absente, `default` est enregistré dans la configuration.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let configured = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };

        let absolute = self.resolve_path(&configured);
        if !absolute.exists() {
            fs::create_dir_all(&absolute)?;
            info!(directory = %absolute.display(), "Created managed directory");
        }
        Ok(absolute.to_string_lossy().into_owned())
    }

    pub fn get_base_url(&self) -> String {
        self.get_string_or(&["host", "base_url"], DEFAULT_BASE_URL)
    }

    /// Port HTTP ; une valeur hors de 1..=65535 donne 8080
    pub fn get_http_port(&self) -> u16 {
        let port = self.get_u64_or(&["host", "http_port"], u64::from(DEFAULT_HTTP_PORT));
        match u16::try_from(port) {
            Ok(p) if p > 0 => p,
            _ => {
                warn!("Invalid HTTP port {}, using {}", port, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(port.into()))
    }

    /// Nombre d'entrées gardées par le buffer de `/log-dump`
    pub fn get_log_cache_size(&self) -> usize {
        self.get_u64_or(&["host", "logger", "buffer_capacity"], DEFAULT_LOG_BUFFER_CAPACITY) as usize
    }

    pub fn get_log_enable_console(&self) -> bool {
        self.get_bool_or(&["host", "logger", "enable_console"], true)
    }

    pub fn get_log_min_level(&self) -> String {
        self.get_string_or(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL)
    }
}

/// Instance globale, chargée au premier accès
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_with(yaml: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FILE_NAME), yaml).unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults_are_embedded() {
        let (_dir, config) = load_with("");
        assert_eq!(config.get_http_port(), 8080);
        assert_eq!(config.get_u64_or(&["radio", "stream", "chunk_size"], 0), 1024);
        assert_eq!(config.get_log_min_level(), "INFO");
        assert!(config.get_log_enable_console());
    }

    #[test]
    fn test_external_file_overrides_defaults() {
        let (_dir, config) =
            load_with("host:\n  HTTP_PORT: 9000\nradio:\n  cache:\n    max_attempts: 5\n");
        assert_eq!(config.get_http_port(), 9000);
        assert_eq!(config.get_u64_or(&["radio", "cache", "max_attempts"], 0), 5);
        // les clés voisines restent celles par défaut
        assert_eq!(config.get_u64_or(&["radio", "cache", "prefetch_depth"], 0), 1);
    }

    #[test]
    fn test_set_value_is_persisted() {
        let (dir, config) = load_with("");
        config.set_http_port(7070).unwrap();

        let reloaded = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(reloaded.get_http_port(), 7070);
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let (dir, config) = load_with("");
        let cache = config
            .get_managed_dir(&["radio", "cache", "directory"], "temp")
            .unwrap();
        assert_eq!(Path::new(&cache), dir.path().join("temp"));
        assert!(Path::new(&cache).is_dir());
    }

    #[test]
    fn test_string_values_are_parsed() {
        let (_dir, config) = load_with("radio:\n  stream:\n    chunk_size: \"2048\"\n");
        assert_eq!(config.get_u64_or(&["radio", "stream", "chunk_size"], 0), 2048);
        assert_eq!(config.get_f64_or(&["radio", "stream", "chunk_size"], 0.0), 2048.0);
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let (_dir, config) = load_with("");
        assert!(config.get_value(&["radio", "nope"]).is_err());
        assert_eq!(config.get_string_or(&["radio", "nope"], "dflt"), "dflt");
    }
}
