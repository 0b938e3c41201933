use anyhow::{Context, Result, bail};
use pmocache::{HttpBlobStore, upload_missing};
use pmoconfig::get_config;
use pmoradio::{Catalog, Radio, RadioConfigExt, RadioServerExt, RadioSettings};
use pmoserver::ServerBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut server = ServerBuilder::new_configured().build();
    server.init_logging().await;

    let settings = get_config().get_radio_settings()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => serve(server, settings).await,
        Some("upload") => {
            let Some(dir) = args.get(1) else {
                bail!("usage: PMORadio upload <directory>");
            };
            upload(&settings, PathBuf::from(dir)).await
        }
        Some(other) => bail!("unknown command {:?} (expected serve or upload)", other),
    }
}

async fn serve(mut server: pmoserver::Server, settings: RadioSettings) -> Result<()> {
    let redirect_url = settings.stream.redirect_url.clone();

    // ========== Moteur radio ==========
    info!("📻 Starting radio engine...");
    let radio = Arc::new(Radio::start(settings).await?);
    let current = radio.get_current()?;
    info!(
        "✅ On air: {} ({:.0}s into iteration {})",
        current.title, current.offset_seconds, current.iteration
    );

    // ========== Routes HTTP ==========
    server.register_radio(radio.clone(), &redirect_url).await;
    let addr = server.start().await?;
    info!("🎧 Stream available at http://{}/stream", addr);

    server.wait().await;

    radio.shutdown().await;
    Ok(())
}

/// Dépose dans le stockage objet les fichiers du catalogue qui n'y sont pas encore
async fn upload(settings: &RadioSettings, dir: PathBuf) -> Result<()> {
    let catalog = Catalog::load(&settings.catalog.path, settings.catalog.default_byte_rate, 1)
        .await
        .with_context(|| format!("loading {}", settings.catalog.path.display()))?;

    let store = HttpBlobStore::new(&settings.cache.blob_base_url)?
        .with_extension(&settings.cache.extension)
        .with_timeout(settings.cache.blob_timeout);

    info!("⬆️ Uploading {} track(s) from {}", catalog.len(), dir.display());
    let report = upload_missing(
        &store,
        &dir,
        &settings.cache.extension,
        catalog.ids(),
        &settings.cache.storage_class,
    )
    .await?;

    info!(
        "✅ {} uploaded, {} already present",
        report.uploaded.len(),
        report.skipped.len()
    );
    if !report.failed.is_empty() {
        warn!("⚠️ {} failed: {}", report.failed.len(), report.failed.join(", "));
        bail!("{} upload(s) failed", report.failed.len());
    }
    Ok(())
}
