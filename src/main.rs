use std::path::PathBuf;

use tracing::{error, info, warn};

use playout_engine::catalog::Catalog;
use playout_engine::engine::{ObsClient, TextStyle};
use playout_engine::orchestrator::{Exit, Orchestrator};
use playout_engine::settings::{self, Settings};
use playout_engine::shutdown::{self, shutdown_signal};
use playout_engine::status::{self, StatusSnapshot};
use playout_engine::store::ResumeStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION");

    match settings::load_env_file() {
        Ok(Some(path)) => info!("loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("{e}");
            std::process::exit(Exit::MISCONFIGURED_CODE);
        }
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(Exit::MISCONFIGURED_CODE);
        }
    };

    let catalog = match Catalog::open(&settings.video_directory, &settings.allowed_extensions, settings.order) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            std::process::exit(Exit::MISCONFIGURED_CODE);
        }
    };

    info!(
        "playout-engine v{version}: {} files under {} (order {:?}, loop {})",
        catalog.len(),
        catalog.root().display(),
        settings.order,
        settings.loop_playlist
    );
    if catalog.is_empty() {
        warn!("no files matching {:?} found", settings.allowed_extensions);
    }

    let store = settings.db_path.clone().map(ResumeStore::new);
    let start = resolve_start(&catalog, &settings, store.as_ref()).await;

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    let status = StatusSnapshot::shared();
    if let Some(addr) = settings.status_bind {
        let status = status.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, status, shutdown).await {
                warn!("status endpoint stopped: {e:#}");
            }
        });
    }

    let engine = ObsClient::new(
        TextStyle {
            font: settings.overlay_font.clone(),
            size: settings.text_size,
        },
        settings.request_timeout,
        settings.poll_interval,
    )
    .with_expected_sources([settings.media_source.clone(), settings.text_source.clone()]);

    let mut orchestrator = Orchestrator::new(engine, catalog, settings, shutdown)
        .with_status(status)
        .start_at(start);
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(store);
    }

    let exit = orchestrator.run().await;
    match exit {
        Exit::Shutdown => info!("playout stopped"),
        Exit::Stopped(reason) => error!("playout stopped: {reason:?}"),
    }
    std::process::exit(exit.code());
}

/// START_EP wins, then the persisted resume point, then the top.
async fn resolve_start(catalog: &Catalog, settings: &Settings, store: Option<&ResumeStore>) -> usize {
    if let Some(needle) = settings.start_episode.as_deref() {
        match catalog.find_start(needle).and_then(|i| catalog.get(i).map(|item| (i, item))) {
            Some((i, item)) => {
                info!("starting at {needle}: {}", item.path.display());
                return i;
            }
            None => warn!("START_EP={needle} matches nothing; starting at the top"),
        }
        return 0;
    }

    let Some(store) = store else {
        return 0;
    };
    let last: Option<PathBuf> = match store.load_last().await {
        Ok(p) => p,
        Err(e) => {
            warn!("resume state unavailable: {e}");
            None
        }
    };
    match last.and_then(|p| catalog.position_of(&p).map(|i| (i, p))) {
        Some((i, p)) => {
            info!("resuming at {}", p.display());
            i
        }
        None => 0,
    }
}
