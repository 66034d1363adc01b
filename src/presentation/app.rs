use crate::domain::feedback::{feedback_queue, DisplaySink, FeedbackLog, FeedbackQueue, FeedbackSender};
use crate::domain::models::{
    AppEvent, BluetoothCommand, DeviceSummary, FeedbackMessage, MessageSeverity,
};
use crate::domain::settings::{BleBackend, Settings, SettingsService};
use crate::infrastructure::bluetooth::mock::MockBleProvider;
use crate::infrastructure::bluetooth::{BluetoothService, ServiceConfig};
use eframe::egui;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Tab {
    Home,
    Settings,
}

/// What the UI thread knows about the session. Updated only by draining the
/// feedback queue.
#[derive(Default)]
pub struct SessionView {
    pub(crate) log: FeedbackLog,
    pub(crate) devices: Vec<DeviceSummary>,
    pub(crate) selected: Option<String>,
    pub(crate) is_enumerating: bool,
    pub(crate) last_sensor_value: Option<(String, Vec<u8>)>,
}

impl SessionView {
    pub fn selected_device(&self) -> Option<&DeviceSummary> {
        let id = self.selected.as_deref()?;
        self.devices.iter().find(|d| d.id == id)
    }
}

impl DisplaySink for SessionView {
    fn append_line(&mut self, message: FeedbackMessage) {
        self.log.append_line(message);
    }

    fn scroll_to_bottom(&mut self) {
        self.log.scroll_to_bottom();
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            // The queue hands log lines to append_line.
            AppEvent::Feedback(_) => {}
            AppEvent::DevicesChanged(devices) => {
                if let Some(id) = &self.selected {
                    if !devices.iter().any(|d| &d.id == id) {
                        self.selected = None;
                    }
                }
                self.devices = devices;
            }
            AppEvent::DeviceState { id, state } => {
                if let Some(device) = self.devices.iter_mut().find(|d| d.id == id) {
                    device.state = state;
                }
            }
            AppEvent::SensorValue { id, value } => self.last_sensor_value = Some((id, value)),
            AppEvent::Enumerating(active) => self.is_enumerating = active,
        }
    }
}

pub struct SampleApp {
    pub(crate) settings: SettingsService,
    pub(crate) bluetooth_tx: mpsc::UnboundedSender<BluetoothCommand>,
    feedback_rx: FeedbackQueue,
    pub(crate) view: SessionView,
    pub(crate) selected_tab: Tab,
    pub(crate) is_dark_mode: bool,

    cancel: CancellationToken,
    bluetooth_thread: Option<JoinHandle<()>>,

    // Logging guard
    _logging_guard: Option<crate::infrastructure::logging::LoggingGuard>,
}

impl SampleApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        crate::presentation::theme::configure_neubrutalism(&cc.egui_ctx, false);

        let settings = SettingsService::new().unwrap_or_else(|e| {
            eprintln!("Failed to locate settings, using ./settings.json: {}", e);
            SettingsService::with_path(PathBuf::from("settings.json"))
        });

        let logging_guard =
            crate::infrastructure::logging::init_logger(&settings.get().log_settings)
                .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
                .ok();

        info!("Starting BLE Device Sample");
        info!("Settings file: {}", settings.path().display());

        let (feedback, feedback_rx) = feedback_queue();
        let (bt_cmd_tx, bt_cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut view = SessionView::default();
        let bluetooth_thread = match spawn_bluetooth_thread(
            settings.get().clone(),
            feedback,
            bt_cmd_rx,
            cancel.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn Bluetooth thread: {}", e);
                view.append_line(FeedbackMessage::new(
                    format!("Bluetooth unavailable: {}", e),
                    MessageSeverity::Error,
                ));
                None
            }
        };

        Self {
            settings,
            bluetooth_tx: bt_cmd_tx,
            feedback_rx,
            view,
            selected_tab: Tab::Home,
            is_dark_mode: false,
            cancel,
            bluetooth_thread,
            _logging_guard: logging_guard,
        }
    }

    /// Forward a user action to the BLE thread.
    pub(crate) fn dispatch(&mut self, command: BluetoothCommand) {
        if self.bluetooth_tx.send(command).is_err() {
            warn!("Bluetooth thread is gone, dropping command");
            self.view.append_line(FeedbackMessage::new(
                "Bluetooth thread stopped",
                MessageSeverity::Error,
            ));
        }
    }

    pub(crate) fn select_device(&mut self, id: String) {
        self.view.selected = Some(id.clone());
        self.dispatch(BluetoothCommand::Select(id));
    }
}

impl Drop for SampleApp {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.bluetooth_thread.take() {
            if handle.join().is_err() {
                error!("Bluetooth thread panicked");
            }
        }
        info!("Session closed");
    }
}

impl eframe::App for SampleApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.feedback_rx.drain_into(&mut self.view);

        // Keep polling while the BLE thread may be producing
        ctx.request_repaint_after(Duration::from_millis(100));

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.selectable_value(&mut self.selected_tab, Tab::Home, "Home");
                ui.selectable_value(&mut self.selected_tab, Tab::Settings, "Settings");

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let switch_icon = if self.is_dark_mode {
                        "☀ Light"
                    } else {
                        "🌙 Dark"
                    };
                    if ui.button(switch_icon).clicked() {
                        self.is_dark_mode = !self.is_dark_mode;
                        crate::presentation::theme::configure_neubrutalism(ctx, self.is_dark_mode);
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .id_salt("page")
                .show(ui, |ui| {
                    ui.vertical_centered(|ui| {
                        ui.set_max_width(800.0);
                        ui.add_space(20.0);

                        use crate::presentation::tabs;
                        match self.selected_tab {
                            Tab::Home => tabs::home::render(self, ui),
                            Tab::Settings => tabs::settings::render(self, ui),
                        }

                        ui.add_space(50.0);
                    });
                });
        });
    }
}

/// Start the BLE thread with its own current-thread runtime. The thread
/// exits when `cancel` fires or the command sender is dropped.
fn spawn_bluetooth_thread(
    settings: Settings,
    feedback: FeedbackSender,
    commands: mpsc::UnboundedReceiver<BluetoothCommand>,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("bluetooth".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    feedback.error(format!("Bluetooth runtime failed: {}", e));
                    return;
                }
            };

            let config = ServiceConfig {
                name_filter: settings.device_name_filter.clone(),
                profile: settings.device_profile.clone(),
            };

            rt.block_on(async move {
                match settings.backend {
                    BleBackend::Native => run_native(feedback, config, commands, cancel).await,
                    BleBackend::Mock => run_mock(feedback, config, commands, cancel).await,
                }
            });
        })
}

async fn run_mock(
    feedback: FeedbackSender,
    config: ServiceConfig,
    commands: mpsc::UnboundedReceiver<BluetoothCommand>,
    cancel: CancellationToken,
) {
    info!("Using mock Bluetooth backend");
    let provider = MockBleProvider::demo(&config.profile);
    BluetoothService::new(provider, feedback, config, cancel)
        .run(commands)
        .await;
}

#[cfg(windows)]
async fn run_native(
    feedback: FeedbackSender,
    config: ServiceConfig,
    commands: mpsc::UnboundedReceiver<BluetoothCommand>,
    cancel: CancellationToken,
) {
    use crate::infrastructure::bluetooth::winrt::WinRtBleProvider;

    info!("Using WinRT Bluetooth backend");
    BluetoothService::new(WinRtBleProvider::new(), feedback, config, cancel)
        .run(commands)
        .await;
}

#[cfg(not(windows))]
async fn run_native(
    feedback: FeedbackSender,
    config: ServiceConfig,
    commands: mpsc::UnboundedReceiver<BluetoothCommand>,
    cancel: CancellationToken,
) {
    warn!("Native Bluetooth backend requires Windows, falling back to mock");
    feedback.warning("Native Bluetooth is only available on Windows, using mock devices");
    run_mock(feedback, config, commands, cancel).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceState;

    fn summary(id: &str, state: DeviceState) -> DeviceSummary {
        DeviceSummary {
            id: id.to_string(),
            name: id.to_string(),
            state,
        }
    }

    #[test]
    fn test_view_tracks_devices_and_state() {
        let mut view = SessionView::default();
        view.apply_event(AppEvent::DevicesChanged(vec![
            summary("A", DeviceState::Disconnected),
            summary("B", DeviceState::Disconnected),
        ]));
        view.selected = Some("A".to_string());
        view.apply_event(AppEvent::DeviceState {
            id: "A".to_string(),
            state: DeviceState::Ready,
        });
        assert_eq!(
            view.selected_device().map(|d| d.state),
            Some(DeviceState::Ready)
        );

        view.apply_event(AppEvent::DevicesChanged(vec![summary(
            "B",
            DeviceState::Disconnected,
        )]));
        assert!(view.selected.is_none());
        assert_eq!(view.devices.len(), 1);
    }

    #[test]
    fn test_view_drains_queue_in_order() {
        let (sender, mut queue) = feedback_queue();
        sender.info("one");
        sender.send(AppEvent::Enumerating(true));
        sender.warning("two");

        let mut view = SessionView::default();
        queue.drain_into(&mut view);

        let texts: Vec<&str> = view.log.lines().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["Start of run.", "one", "two"]);
        assert!(view.is_enumerating);
        assert!(view.log.take_scroll_request());
    }

    fn mock_settings() -> Settings {
        Settings {
            backend: BleBackend::Mock,
            ..Settings::default()
        }
    }

    fn log_texts(queue: &mut FeedbackQueue) -> Vec<String> {
        let mut view = SessionView::default();
        queue.drain_into(&mut view);
        view.log
            .lines()
            .iter()
            .map(|m| m.text().to_string())
            .collect()
    }

    #[test]
    fn test_feedback_event_applied_directly_is_ignored() {
        let mut view = SessionView::default();
        view.apply_event(AppEvent::Feedback(FeedbackMessage::info("stray")));
        assert_eq!(view.log.lines().len(), 1);
        assert!(!view.log.take_scroll_request());
    }

    #[test]
    fn test_mock_session_thread_serves_commands_until_sender_dropped() {
        let (feedback, mut queue) = feedback_queue();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle =
            spawn_bluetooth_thread(mock_settings(), feedback, rx, cancel.clone()).unwrap();
        tx.send(BluetoothCommand::StartEnumeration).unwrap();
        tx.send(BluetoothCommand::CustomCommand).unwrap();
        drop(tx);
        handle.join().unwrap();
        assert!(!cancel.is_cancelled());

        let texts = log_texts(&mut queue);
        let enumerate = texts.iter().position(|t| t == "OnEnumerateClicked");
        let custom = texts.iter().position(|t| t == "OnDoSomethingClicked");
        assert!(enumerate.is_some());
        assert!(custom.is_some());
        assert!(enumerate < custom);
    }

    #[test]
    fn test_mock_session_thread_stops_on_cancel() {
        let (feedback, mut queue) = feedback_queue();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle =
            spawn_bluetooth_thread(mock_settings(), feedback, rx, cancel.clone()).unwrap();
        cancel.cancel();
        handle.join().unwrap();

        // The thread owned the receiver, so the sender is now closed.
        assert!(tx.send(BluetoothCommand::CustomCommand).is_err());
        assert_eq!(log_texts(&mut queue), vec!["Start of run."]);
    }
}
