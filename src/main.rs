use anyhow::Result;
use huiben::core::config::{Config, TransportMode};
use huiben::core::io::NativeStorage;
use huiben::core::transport::{
    Dispatcher, EmbeddedHost, HttpTransport, NoEmbeddedHost, TransportProbe,
};
use huiben::services::export::DirectoryDownloads;
use huiben::services::host::LocalCommandHost;
use huiben::services::setup;
use huiben::services::workflow::Studio;
use huiben::ui::{self, InquireSaveDialog};
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please check that 'config.yml' is valid YAML or remove it to use defaults.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let probe: Arc<dyn TransportProbe> = match config.transport {
        TransportMode::Embedded => {
            let storage = Arc::new(NativeStorage::new(&config.data_folder));
            let host = LocalCommandHost::open(storage).await?;
            Arc::new(EmbeddedHost(Arc::new(host)))
        }
        TransportMode::Http => Arc::new(NoEmbeddedHost),
    };
    info!("Transport: {:?}", config.transport);

    let dispatcher = Arc::new(Dispatcher::new(
        probe,
        HttpTransport::new(&config.server_url),
        &config.local_service_url,
    ));

    let mut studio = Studio::new(
        dispatcher,
        Arc::new(InquireSaveDialog::new(&config.download_folder)),
        Arc::new(DirectoryDownloads::new(&config.download_folder)),
        Duration::from_millis(config.progress_tick_ms.max(50)),
    );

    studio.startup().await;
    setup::run_setup(&mut studio).await?;
    ui::run(&mut studio).await?;

    Ok(())
}
