use crate::domain::device::STATUS_PATH;
use crate::domain::events::Notification;
use crate::gateway::{Gateway, GatewayError, SharedProxyConfig};
use crate::reachability::ReachabilityHandle;
use crate::reconciler::{DetailView, Reconciler};
use crate::repository::DeviceRepository;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingMode {
    Idle,
    List,
    Detail(String),
}

/// Cadence and grace values are policy, carried in from configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub list_interval: Duration,
    pub detail_interval: Duration,
    pub command_grace: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            list_interval: Duration::from_secs(15),
            detail_interval: Duration::from_secs(3),
            command_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
struct SchedulerContext {
    gateway: Arc<dyn Gateway>,
    repository: DeviceRepository,
    reconciler: Reconciler,
}

/// Owns the one active polling mode. Every mode switch aborts the previous
/// loop task before arming a new one, so no two timers are ever concurrently
/// armed. In-flight probes run in their own tasks and are left to complete or
/// time out on their own; they simply do not get rescheduled.
pub struct Scheduler {
    ctx: SchedulerContext,
    config: PollingConfig,
    proxy: SharedProxyConfig,
    reachability: ReachabilityHandle,
    detail_view: DetailView,
    notifications: mpsc::Sender<Notification>,
    mode: Arc<watch::Sender<PollingMode>>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        repository: DeviceRepository,
        reconciler: Reconciler,
        detail_view: DetailView,
        proxy: SharedProxyConfig,
        reachability: ReachabilityHandle,
        notifications: mpsc::Sender<Notification>,
        config: PollingConfig,
    ) -> Self {
        let (mode, _) = watch::channel(PollingMode::Idle);
        Scheduler {
            ctx: SchedulerContext {
                gateway,
                repository,
                reconciler,
            },
            config,
            proxy,
            reachability,
            detail_view,
            notifications,
            mode: Arc::new(mode),
            task: None,
        }
    }

    pub fn mode(&self) -> PollingMode {
        self.mode.borrow().clone()
    }

    /// Synchronously cancels the armed timer, if any, and drops to idle.
    fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.mode.send_replace(PollingMode::Idle);
    }

    /// Explicit stop (navigation away, network loss, manual command).
    pub fn stop(&mut self) {
        self.disarm();
        debug!("⏹️ All polling stopped");
    }

    async fn can_poll(&self) -> bool {
        self.reachability.is_online() && self.proxy.read().await.is_configured()
    }

    /// Starts the roster-wide cadence: an immediate cycle, then one every
    /// list interval. Stays idle while offline or unconfigured.
    #[instrument(skip(self))]
    pub async fn start_list_polling(&mut self) {
        self.disarm();
        if !self.can_poll().await {
            debug!("🔃 Not starting list polling, offline or no proxy configured");
            return;
        }

        self.mode.send_replace(PollingMode::List);
        let ctx = self.ctx.clone();
        let period = self.config.list_interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll_roster(&ctx).await;
            }
        }));
        info!("🔃 List polling started, every {:?}", period);
    }

    /// Opens a device's detail view and switches to the detail cadence.
    #[instrument(skip(self))]
    pub async fn open_detail(&mut self, device_id: &str) {
        if !self.ctx.repository.contains(device_id).await {
            self.notifications.send(Notification::error("Device not found")).await.unwrap_or_default();
            return;
        }
        self.detail_view.open(device_id);
        self.start_detail_polling(device_id.to_string()).await;
    }

    /// Closing the detail view falls back to the roster-wide cadence.
    pub async fn close_detail(&mut self) {
        self.detail_view.close();
        self.start_list_polling().await;
    }

    /// Deleting the device behind an open detail view tears its polling down
    /// and falls back to list polling.
    pub async fn device_deleted(&mut self, device_id: &str) {
        if self.detail_view.is_open(device_id) {
            self.close_detail().await;
        }
    }

    pub async fn network_changed(&mut self, online: bool) {
        if online {
            self.resume().await;
        } else {
            self.stop();
        }
    }

    /// New polling cycles pick the proxy settings up immediately: a restart
    /// with the new value, or a drop to idle when the proxy was cleared.
    pub async fn proxy_changed(&mut self) {
        self.resume().await;
    }

    /// Picks the polling mode matching the current view: the open detail
    /// view if there is one, the roster otherwise.
    pub async fn resume(&mut self) {
        match self.detail_view.current() {
            Some(device_id) => self.start_detail_polling(device_id).await,
            None => self.start_list_polling().await,
        }
    }

    async fn start_detail_polling(&mut self, device_id: String) {
        self.disarm();
        if !self.can_poll().await {
            debug!("🔃 Not starting detail polling, offline or no proxy configured");
            return;
        }

        self.mode.send_replace(PollingMode::Detail(device_id.clone()));
        let ctx = self.ctx.clone();
        let mode = self.mode.clone();
        let period = self.config.detail_interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !ctx.repository.contains(&device_id).await {
                    warn!("🔃 Detail polling target '{}' no longer exists, stopping", device_id);
                    mode.send_if_modified(|current| {
                        if *current == PollingMode::Detail(device_id.clone()) {
                            *current = PollingMode::Idle;
                            return true;
                        }
                        false
                    });
                    break;
                }

                let ctx = ctx.clone();
                let device_id = device_id.clone();
                tokio::spawn(async move {
                    let _ = probe_status(&ctx, &device_id, true).await;
                });
            }
        }));
        info!("🔃 Detail polling started, every {:?}", period);
    }

    /// User-triggered refresh of a single device, outside the cadence. The
    /// outcome is reported straight to the user; there is no automatic retry.
    #[instrument(skip(self))]
    pub async fn refresh_device(&mut self, device_id: &str) -> Result<(), GatewayError> {
        if !self.ctx.repository.contains(device_id).await {
            self.notifications.send(Notification::error("Device not found")).await.unwrap_or_default();
            return Ok(());
        }
        let result = probe_status(&self.ctx, device_id, true).await;
        let notification = match &result {
            Ok(_) => Notification::success("Device status updated"),
            Err(e) => Notification::error(format!("Manual refresh failed: {e}")),
        };
        self.notifications.send(notification).await.unwrap_or_default();
        result
    }

    /// Runs a device command outside the polling cadence. All polling is
    /// suspended for the duration plus a grace period, so a manual action and
    /// a concurrent poll never write device state from overlapping probes.
    #[instrument(skip(self))]
    pub async fn execute_command(&mut self, device_id: &str, command_path: &str, command_name: &str) -> Result<(), GatewayError> {
        self.stop();
        let result = self.run_command(device_id, command_path, command_name).await;
        tokio::time::sleep(self.config.command_grace).await;
        self.resume().await;
        result
    }

    async fn run_command(&self, device_id: &str, command_path: &str, command_name: &str) -> Result<(), GatewayError> {
        let Some(device) = self.ctx.repository.find(device_id).await else {
            self.notifications.send(Notification::error("Device not found")).await.unwrap_or_default();
            return Ok(());
        };

        match self.ctx.gateway.probe(&device, command_path, "GET").await {
            Ok(response) => {
                debug!("🎛️ Command '{}' succeeded: {}", command_name, response);
                if let Some(state) = response.get("current_state").and_then(Value::as_str) {
                    self.ctx.reconciler.apply_command_result(device_id, state).await;
                }
                Ok(())
            }
            Err(e) => {
                self.notifications
                    .send(Notification::error(format!("Failed to run command '{command_name}': {e}")))
                    .await
                    .unwrap_or_default();
                Err(e)
            }
        }
    }
}

/// One roster cycle. Probes are spawned per device, so a slow or failing
/// device never blocks or aborts the cycle for the others.
async fn poll_roster(ctx: &SchedulerContext) {
    let ids = ctx.repository.device_ids().await;
    debug!("🔃 Polling {} device(s)", ids.len());
    for device_id in ids {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _ = probe_status(&ctx, &device_id, true).await;
        });
    }
}

async fn probe_status(ctx: &SchedulerContext, device_id: &str, refresh_ui: bool) -> Result<(), GatewayError> {
    let Some(device) = ctx.repository.find(device_id).await else {
        debug!("🔃 Skipping probe, device '{}' no longer exists", device_id);
        return Ok(());
    };

    let outcome = ctx.gateway.probe(&device, STATUS_PATH, "GET").await;
    let result = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
    ctx.reconciler.reconcile(device_id, &outcome, refresh_ui).await;
    result
}

/// Bridges reachability transitions into scheduler mode changes: suspend
/// everything on loss, resume the appropriate mode on recovery.
#[instrument(skip_all)]
pub async fn reachability_listener(mut rx: watch::Receiver<bool>, scheduler: Arc<Mutex<Scheduler>>) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let mut scheduler = scheduler.lock().await;
        scheduler.network_changed(online).await;
    }
}
