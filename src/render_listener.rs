use crate::domain::device::format_time_ago;
use crate::domain::events::{Notification, RenderEvent, Severity};
use crate::repository::DeviceRepository;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, instrument};

/// Terminal stand-in for the render sink: re-reads the repository for every
/// event and logs what a UI would redraw.
#[instrument(skip_all)]
pub async fn render_listener(mut rx: Receiver<RenderEvent>, repository: DeviceRepository) {
    while let Some(event) = rx.recv().await {
        match event {
            RenderEvent::CountersChanged => {
                let stats = repository.stats().await;
                info!("🖥️ {} device(s), {} online", stats.total, stats.online);
            }
            RenderEvent::DeviceChanged(device_id) => {
                if let Some(device) = repository.find(&device_id).await {
                    info!(
                        "🖥️ {} ({}) is {:?}, {}",
                        device.name,
                        device.esp_ip,
                        device.status,
                        format_time_ago(device.last_updated)
                    );
                }
            }
            RenderEvent::DetailChanged(device_id) => {
                if let Some(device) = repository.find(&device_id).await {
                    let controls: Vec<String> = device
                        .control_commands()
                        .map(|command| {
                            let marker = if device.is_command_inert(command) { "·" } else { "▸" };
                            format!("{marker} {}", command.name)
                        })
                        .collect();
                    info!(
                        "🖥️ Detail view: {} {:?} {:?} [{}]",
                        device.name,
                        device.status,
                        device.info,
                        controls.join(", ")
                    );
                }
            }
        }
    }
}

#[instrument(skip_all)]
pub async fn notification_listener(mut rx: Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match notification.severity {
            Severity::Success => info!("🔔 {}", notification.message),
            Severity::Error => error!("🔔 {}", notification.message),
        }
    }
}
