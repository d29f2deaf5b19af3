use plaque_daemon::display::{HeadlessDisplay, KioskDisplay};
use plaque_daemon::media::HttpMediaClient;
use plaque_daemon::mpv::MpvPlayer;
use plaque_daemon::player::Display;
use plaque_daemon::remote_http::HttpRemoteStore;
use plaque_daemon::viewer::{Collaborators, Viewer};
use plaque_proto::config::Config;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = plaque_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,plaque_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    if std::env::args().any(|a| a == "--use-system-deps") {
        plaque_proto::platform::set_use_system_deps(true);
    }

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let display: Arc<dyn Display> = if config.display.enabled {
        Arc::new(KioskDisplay::new(&config.display, &config.http))
    } else {
        Arc::new(HeadlessDisplay)
    };
    let collaborators = Collaborators {
        remote: Arc::new(HttpRemoteStore::new(&config.remote)?),
        media: Arc::new(HttpMediaClient::new(&config.archive)?),
        player: Arc::new(MpvPlayer::new(&config.player, data_dir.join("playlist.m3u"))),
        display,
    };

    let viewer = Arc::new(Viewer::new(config.clone(), collaborators));

    if config.http.enabled {
        let _http_handle = plaque_daemon::http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            viewer.clone(),
        );
    }

    let cancel = viewer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            cancel.cancel();
        }
    });

    if let Err(e) = viewer.startup().await {
        error!("Viewer stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}
