use crate::domain::device::{stringify, DeviceStatus};
use crate::domain::events::{Notification, RenderEvent};
use crate::gateway::GatewayError;
use crate::repository::DeviceRepository;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Which device's detail view is currently open, shared between the
/// scheduler (writer) and the reconciler (reader). Detail render events are
/// only emitted for this exact device.
#[derive(Debug, Clone)]
pub struct DetailView {
    state: Arc<watch::Sender<Option<String>>>,
}

impl DetailView {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        DetailView { state: Arc::new(state) }
    }

    pub fn open(&self, device_id: &str) {
        self.state.send_replace(Some(device_id.to_string()));
    }

    pub fn close(&self) {
        self.state.send_replace(None);
    }

    pub fn current(&self) -> Option<String> {
        self.state.borrow().clone()
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.state.borrow().as_deref() == Some(device_id)
    }
}

impl Default for DetailView {
    fn default() -> Self {
        DetailView::new()
    }
}

/// Applies one probe outcome to one device record, then takes care of the
/// UI refresh obligations that follow from it.
#[derive(Clone)]
pub struct Reconciler {
    repository: DeviceRepository,
    detail_view: DetailView,
    render: mpsc::Sender<RenderEvent>,
    notifications: mpsc::Sender<Notification>,
}

impl Reconciler {
    pub fn new(
        repository: DeviceRepository,
        detail_view: DetailView,
        render: mpsc::Sender<RenderEvent>,
        notifications: mpsc::Sender<Notification>,
    ) -> Self {
        Reconciler {
            repository,
            detail_view,
            render,
            notifications,
        }
    }

    /// Success sets the device online, merges the returned fields into its
    /// info map and stamps the update time; any failure sets it offline.
    /// Exactly one device is touched, so one device's failure never spills
    /// into the rest of a polling cycle.
    #[instrument(skip(self, outcome))]
    pub async fn reconcile(&self, device_id: &str, outcome: &Result<Value, GatewayError>, refresh_ui: bool) {
        let found = self
            .repository
            .with_device_mut(device_id, |device| match outcome {
                Ok(payload) => {
                    device.status = DeviceStatus::Online;
                    if let Some(fields) = payload.as_object() {
                        for (key, value) in fields {
                            device.info.insert(key.clone(), stringify(value.clone()));
                        }
                    }
                    device.last_updated = Some(Utc::now());
                }
                Err(_) => device.status = DeviceStatus::Offline,
            })
            .await;

        if !found {
            warn!("⚠️ Dropping probe outcome for unknown device '{}'", device_id);
            return;
        }

        match outcome {
            Ok(_) => info!("🟢 Device '{}' is online", device_id),
            Err(e) => debug!("🔴 Device '{}' is offline: {}", device_id, e),
        }

        if refresh_ui {
            self.refresh(device_id).await;
        }
    }

    /// A manual command only reports back the new switch state; it refreshes
    /// the open detail view and skips the roster-wide refresh path.
    pub async fn apply_command_result(&self, device_id: &str, current_state: &str) {
        let found = self
            .repository
            .with_device_mut(device_id, |device| {
                device.info.insert("current_state".to_string(), current_state.to_string());
                device.status = DeviceStatus::Online;
                device.last_updated = Some(Utc::now());
            })
            .await;

        if found && self.detail_view.is_open(device_id) {
            self.render.send(RenderEvent::DetailChanged(device_id.to_string())).await.unwrap_or_default();
        }
    }

    async fn refresh(&self, device_id: &str) {
        // Persist before requesting any re-render, so a concurrent read of
        // the repository during render always sees the update. A storage
        // failure is reported but never rolls back the in-memory state.
        if let Err(e) = self.repository.persist().await {
            warn!("⚠️ Failed to persist device roster: {}", e);
            self.notifications
                .send(Notification::error(format!("Failed to save devices: {e}")))
                .await
                .unwrap_or_default();
        }

        self.render.send(RenderEvent::CountersChanged).await.unwrap_or_default();
        self.render.send(RenderEvent::DeviceChanged(device_id.to_string())).await.unwrap_or_default();
        if self.detail_view.is_open(device_id) {
            self.render.send(RenderEvent::DetailChanged(device_id.to_string())).await.unwrap_or_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::Device;
    use crate::domain::events::Severity;
    use crate::repository::DEVICES_KEY;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        reconciler: Reconciler,
        repository: DeviceRepository,
        storage: Arc<MemoryStorage>,
        detail_view: DetailView,
        render_rx: mpsc::Receiver<RenderEvent>,
        notification_rx: mpsc::Receiver<Notification>,
        device_id: String,
    }

    async fn fixture_with(storage: MemoryStorage) -> Fixture {
        let storage = Arc::new(storage);
        let repository = DeviceRepository::new(storage.clone());
        let device = Device::new("Lamp", "10.0.0.5", 80, Some(3), vec![]).unwrap();
        let device_id = device.id.clone();
        repository.add(device).await;

        let detail_view = DetailView::new();
        let (render_tx, render_rx) = mpsc::channel(16);
        let (notification_tx, notification_rx) = mpsc::channel(16);
        let reconciler = Reconciler::new(repository.clone(), detail_view.clone(), render_tx, notification_tx);

        Fixture {
            reconciler,
            repository,
            storage,
            detail_view,
            render_rx,
            notification_rx,
            device_id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MemoryStorage::default()).await
    }

    #[tokio::test]
    async fn success_sets_online_merges_info_and_stamps_the_time() {
        let mut fixture = fixture().await;
        let payload = json!({ "current_state": "on", "firmware": "1.2.0" });

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(payload), true).await;

        let device = fixture.repository.find(&fixture.device_id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.info.get("current_state"), Some(&"on".to_string()));
        assert_eq!(device.info.get("firmware"), Some(&"1.2.0".to_string()));
        assert!(device.last_updated.is_some());

        assert_eq!(fixture.render_rx.try_recv().unwrap(), RenderEvent::CountersChanged);
        assert_eq!(
            fixture.render_rx.try_recv().unwrap(),
            RenderEvent::DeviceChanged(fixture.device_id.clone())
        );
        assert!(fixture.render_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn success_merge_overwrites_existing_keys_and_preserves_others() {
        let fixture = fixture().await;
        fixture
            .repository
            .with_device_mut(&fixture.device_id, |device| {
                device.info.insert("current_state".to_string(), "off".to_string());
                device.info.insert("device".to_string(), "ESP8266".to_string());
            })
            .await;

        fixture
            .reconciler
            .reconcile(&fixture.device_id, &Ok(json!({ "current_state": "on" })), false)
            .await;

        let device = fixture.repository.find(&fixture.device_id).await.unwrap();
        assert_eq!(device.info.get("current_state"), Some(&"on".to_string()));
        assert_eq!(device.info.get("device"), Some(&"ESP8266".to_string()));
    }

    #[tokio::test]
    async fn reconciling_identical_payloads_twice_only_moves_the_timestamp() {
        let fixture = fixture().await;
        let payload = json!({ "current_state": "on" });

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(payload.clone()), false).await;
        let first = fixture.repository.find(&fixture.device_id).await.unwrap();

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(payload), false).await;
        let second = fixture.repository.find(&fixture.device_id).await.unwrap();

        assert_eq!(
            Device {
                last_updated: None,
                ..second
            },
            Device {
                last_updated: None,
                ..first
            }
        );
    }

    #[tokio::test]
    async fn any_failure_sets_the_device_offline() {
        let mut fixture = fixture().await;
        fixture
            .reconciler
            .reconcile(&fixture.device_id, &Ok(json!({ "current_state": "on" })), false)
            .await;

        fixture
            .reconciler
            .reconcile(&fixture.device_id, &Err(GatewayError::Timeout), true)
            .await;

        let device = fixture.repository.find(&fixture.device_id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        // The failure still triggers the refresh obligations.
        assert_eq!(fixture.render_rx.try_recv().unwrap(), RenderEvent::CountersChanged);
    }

    #[tokio::test]
    async fn detail_view_event_is_only_sent_for_the_open_device() {
        let mut fixture = fixture().await;
        fixture.detail_view.open("someone-else");

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(json!({})), true).await;

        let events: Vec<_> = std::iter::from_fn(|| fixture.render_rx.try_recv().ok()).collect();
        assert!(!events.contains(&RenderEvent::DetailChanged(fixture.device_id.clone())));

        fixture.detail_view.open(&fixture.device_id);
        fixture.reconciler.reconcile(&fixture.device_id, &Ok(json!({})), true).await;

        let events: Vec<_> = std::iter::from_fn(|| fixture.render_rx.try_recv().ok()).collect();
        assert!(events.contains(&RenderEvent::DetailChanged(fixture.device_id.clone())));
    }

    #[tokio::test]
    async fn refresh_persists_before_rendering() {
        let mut fixture = fixture().await;

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(json!({})), true).await;

        // The first render event is only observable after persistence, so
        // the stored roster already shows the device online.
        assert_eq!(fixture.render_rx.try_recv().unwrap(), RenderEvent::CountersChanged);
        let stored = fixture.storage.get(DEVICES_KEY).await.unwrap().unwrap();
        assert_eq!(stored[0]["status"], "online");
    }

    #[tokio::test]
    async fn a_persistence_failure_is_reported_but_keeps_the_in_memory_state() {
        let mut fixture = fixture_with(MemoryStorage::failing()).await;

        fixture.reconciler.reconcile(&fixture.device_id, &Ok(json!({})), true).await;

        let notification = fixture.notification_rx.try_recv().unwrap();
        assert_eq!(notification.severity, Severity::Error);
        let device = fixture.repository.find(&fixture.device_id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        // Rendering is still requested.
        assert_eq!(fixture.render_rx.try_recv().unwrap(), RenderEvent::CountersChanged);
    }

    #[tokio::test]
    async fn apply_command_result_updates_state_and_refreshes_the_open_detail_view() {
        let mut fixture = fixture().await;
        fixture.detail_view.open(&fixture.device_id);

        fixture.reconciler.apply_command_result(&fixture.device_id, "on").await;

        let device = fixture.repository.find(&fixture.device_id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.info.get("current_state"), Some(&"on".to_string()));
        assert_eq!(
            fixture.render_rx.try_recv().unwrap(),
            RenderEvent::DetailChanged(fixture.device_id.clone())
        );
    }
}
