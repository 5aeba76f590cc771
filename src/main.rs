use crate::app_config::AppConfig;
use crate::domain::events::{Notification, RenderEvent};
use crate::gateway::ProxyGateway;
use crate::reachability::ReachabilityMonitor;
use crate::reconciler::{DetailView, Reconciler};
use crate::render_listener::{notification_listener, render_listener};
use crate::repository::DeviceRepository;
use crate::scheduler::{reachability_listener, Scheduler};
use crate::storage::JsonFileStorage;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task;
use tracing::info;

mod app_config;
mod domain;
mod gateway;
mod reachability;
mod reconciler;
mod render_listener;
mod repository;
mod scheduler;
mod storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    info!("🏠 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load();
    info!("✅  Loaded configuration");

    let storage = Arc::new(JsonFileStorage::new(config.storage().file()));
    let repository = DeviceRepository::new(storage);
    let count = repository.load().await?;
    info!("✅  Loaded {} device(s), all reset to offline", count);

    // A proxy configuration saved by a previous run wins over the seed
    // values from the configuration file.
    let proxy_config = repository.load_proxy_config().await?.unwrap_or_else(|| gateway::ProxyConfig {
        url: config.proxy().url().to_string(),
        timeout: config.proxy().timeout_secs(),
    });
    let configured = proxy_config.is_configured();
    let proxy = Arc::new(RwLock::new(proxy_config));

    let (notification_tx, notification_rx) = mpsc::channel::<Notification>(config.core().notification_buffer_size());
    let (render_tx, render_rx) = mpsc::channel::<RenderEvent>(config.core().render_buffer_size());

    let monitor = ReachabilityMonitor::new(true, notification_tx.clone());
    let detail_view = DetailView::new();
    let gateway = Arc::new(ProxyGateway::new(proxy.clone(), monitor.handle()));
    let reconciler = Reconciler::new(repository.clone(), detail_view.clone(), render_tx, notification_tx.clone());

    task::spawn(render_listener(render_rx, repository.clone()));
    task::spawn(notification_listener(notification_rx));
    info!("✅  Initialized render and notification listeners");

    let scheduler = Arc::new(Mutex::new(Scheduler::new(
        gateway,
        repository.clone(),
        reconciler,
        detail_view,
        proxy,
        monitor.handle(),
        notification_tx,
        config.core().polling(),
    )));

    task::spawn(reachability_listener(monitor.subscribe(), scheduler.clone()));
    info!("✅  Initialized reachability listener");

    if configured {
        scheduler.lock().await.start_list_polling().await;
    } else {
        info!("⚠️  No proxy configured, polling stays idle until one is set");
    }

    info!("🏠 {} is up and running", env!("CARGO_PKG_NAME"));

    tokio::signal::ctrl_c().await?;
    info!("🏠 Shutting down");
    scheduler.lock().await.stop();

    Ok(())
}
