//! Bluetooth Service Module
//!
//! Coordinates enumeration, the device cache, device selection, and the user
//! actions forwarded from the UI. Runs on the BLE thread, which is the only
//! owner of the cache and of every characteristic handle.

use crate::domain::command::Command;
use crate::domain::feedback::FeedbackSender;
use crate::domain::models::{AppEvent, BluetoothCommand, DeviceState};
use crate::domain::settings::DeviceProfile;
use crate::infrastructure::bluetooth::cache::DeviceCache;
use crate::infrastructure::bluetooth::device::{DiscoveryOutcome, SampleDevice};
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::provider::{
    BleDevice, BleProvider, EnumerationEvent, RemovedDevice,
};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type EnumerationReceiver<D> = mpsc::UnboundedReceiver<EnumerationEvent<D>>;

/// Options the coordinator reads at startup.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Only announce devices whose name contains this text. Empty announces
    /// every device. All devices are cached either way.
    pub name_filter: String,
    pub profile: DeviceProfile,
}

enum Next<D> {
    Shutdown,
    Command(Option<BluetoothCommand>),
    Enumeration(Option<EnumerationEvent<D>>),
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<P: BleProvider> {
    provider: P,
    cache: DeviceCache<P::Device>,
    selected: Option<String>,
    enumeration: Option<EnumerationReceiver<P::Device>>,
    feedback: FeedbackSender,
    config: ServiceConfig,
    cancel: CancellationToken,
}

impl<P: BleProvider> BluetoothService<P> {
    pub fn new(
        provider: P,
        feedback: FeedbackSender,
        config: ServiceConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            cache: DeviceCache::new(),
            selected: None,
            enumeration: None,
            feedback,
            config,
            cancel,
        }
    }

    pub fn cache(&self) -> &DeviceCache<P::Device> {
        &self.cache
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Serve UI commands and enumeration events until the session is
    /// cancelled or the UI drops its command sender.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        info!("Bluetooth service started");
        let cancel = self.cancel.clone();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => Next::Shutdown,
                command = commands.recv() => Next::Command(command),
                event = next_event(&mut self.enumeration) => Next::Enumeration(event),
            };

            match next {
                Next::Shutdown | Next::Command(None) => break,
                Next::Command(Some(command)) => self.handle_command(command).await,
                Next::Enumeration(Some(event)) => self.handle_enumeration_event(event),
                Next::Enumeration(None) => {
                    self.enumeration = None;
                    self.feedback.send(AppEvent::Enumerating(false));
                }
            }
        }

        if let Err(e) = self.provider.stop_enumeration() {
            warn!("Stopping enumeration on shutdown failed: {}", e);
        }
        info!("Bluetooth service stopped");
    }

    pub async fn handle_command(&mut self, command: BluetoothCommand) {
        match command {
            BluetoothCommand::StartEnumeration => self.start_enumeration(),
            BluetoothCommand::StopEnumeration => self.stop_enumeration(),
            BluetoothCommand::Select(id) => self.select(&id),
            BluetoothCommand::Connect => {
                self.connect_selected().await;
            }
            BluetoothCommand::ConnectServices => {
                self.connect_services().await;
            }
            BluetoothCommand::Disconnect => {
                self.disconnect_selected().await;
            }
            BluetoothCommand::Send(command) => {
                // Failures are already reported as feedback.
                let _ = self.send_command(&command).await;
            }
            BluetoothCommand::CustomCommand => self.custom_command(),
        }
    }

    pub fn start_enumeration(&mut self) {
        self.feedback.info("OnEnumerateClicked");
        match self.provider.start_enumeration() {
            Ok(rx) => {
                self.enumeration = Some(rx);
                self.feedback.send(AppEvent::Enumerating(true));
                info!("Device enumeration started");
            }
            Err(e) => {
                error!("Failed to start enumeration: {}", e);
                self.feedback
                    .error(format!("Failed to start enumeration: {}", e));
            }
        }
    }

    pub fn stop_enumeration(&mut self) {
        if let Err(e) = self.provider.stop_enumeration() {
            warn!("Failed to stop enumeration: {}", e);
            self.feedback.warning(format!("Failed to stop enumeration: {}", e));
        }
        self.enumeration = None;
        self.feedback.send(AppEvent::Enumerating(false));
        self.feedback.info("Enumeration stopped");
    }

    pub fn handle_enumeration_event(&mut self, event: EnumerationEvent<P::Device>) {
        match event {
            EnumerationEvent::Added(devices) => self.on_devices_added(devices),
            EnumerationEvent::Removed(removed) => self.on_devices_removed(removed),
            EnumerationEvent::Completed => {
                self.feedback
                    .info(format!("Enumeration complete, {} devices cached", self.cache.len()));
            }
        }
    }

    pub fn on_devices_added(&mut self, devices: Vec<P::Device>) {
        for device in devices {
            let name = device.name().to_string();
            if self.cache.contains(device.id()) {
                self.feedback
                    .info(format!("BTLE Duplicate device seen: {}", name));
                continue;
            }

            let mut sample = SampleDevice::new(device, self.config.profile.clone());
            sample.attach_feedback(self.feedback.clone());
            self.cache.insert(sample);

            self.feedback.info(format!("BTLE Device added: {}", name));
            let filter = &self.config.name_filter;
            if filter.is_empty() {
                self.feedback.info(format!("BTLE Device found: {}", name));
            } else if name.contains(filter.as_str()) {
                self.feedback
                    .success(format!("Filtered BTLE Device found: {}", name));
            }
        }
        self.publish_devices();
    }

    /// Unknown identifiers are ignored without feedback.
    pub fn on_devices_removed(&mut self, removed: Vec<RemovedDevice>) {
        let mut changed = false;
        for RemovedDevice { id } in removed {
            if let Some(device) = self.cache.remove(&id) {
                changed = true;
                self.feedback.info(format!("removed: {}", device.name()));
                if self.selected.as_deref() == Some(id.as_str()) {
                    self.selected = None;
                }
            }
        }
        if changed {
            self.publish_devices();
        }
    }

    pub fn select(&mut self, id: &str) {
        match self.cache.get(id) {
            Some(device) => {
                self.feedback.info(format!("Selected {}", device.name()));
                self.selected = Some(id.to_string());
            }
            None => {
                self.feedback
                    .warning(format!("Cannot select unknown device {}", id));
            }
        }
    }

    fn selected_device(&mut self) -> Result<&mut SampleDevice<P::Device>, BleError> {
        let id = self.selected.as_deref().ok_or(BleError::NoDeviceSelected)?;
        self.cache
            .get_mut(id)
            .ok_or_else(|| BleError::DeviceNotFound(id.to_string()))
    }

    pub async fn connect_selected(&mut self) -> bool {
        self.feedback.info("OnConnectClicked");
        let cancel = self.cancel.clone();
        let result = match self.selected_device() {
            Ok(device) => until_cancelled(&cancel, device.connect()).await,
            Err(e) => Err(e),
        };
        let connected = match result {
            Ok(connected) => connected,
            Err(e) => {
                self.feedback.warning(e.to_string());
                false
            }
        };
        self.publish_devices();
        connected
    }

    /// Run service discovery on the selected device. A disconnected device is
    /// connected first. Nothing happens when no device is selected.
    pub async fn connect_services(&mut self) -> Option<DiscoveryOutcome> {
        self.feedback.info("OnConnectServicesClicked");
        let cancel = self.cancel.child_token();
        let device = match self.selected_device() {
            Ok(device) => device,
            Err(e) => {
                self.feedback.warning(e.to_string());
                return None;
            }
        };

        let result = if device.state() == DeviceState::Disconnected {
            match until_cancelled(&cancel, device.connect()).await {
                Ok(true) => until_cancelled(&cancel, device.connect_service(&cancel)).await,
                Ok(false) => {
                    self.publish_devices();
                    return None;
                }
                Err(e) => Err(e),
            }
        } else {
            until_cancelled(&cancel, device.connect_service(&cancel)).await
        };

        let outcome = match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!("Service discovery failed: {}", e);
                None
            }
            Err(e) => {
                self.feedback.warning(e.to_string());
                None
            }
        };
        self.publish_devices();
        outcome
    }

    /// Drop the selected device's link and discovered handles.
    pub async fn disconnect_selected(&mut self) -> bool {
        self.feedback.info("OnDisconnectClicked");
        let result = match self.selected_device() {
            Ok(device) => device.disconnect().await,
            Err(e) => {
                self.feedback.warning(e.to_string());
                return false;
            }
        };
        self.publish_devices();
        result.is_ok()
    }

    /// Write `command` to the selected device.
    pub async fn send_command(&mut self, command: &Command) -> Result<(), BleError> {
        let result = match self.selected_device() {
            Ok(device) => device.send(command).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => self
                .feedback
                .info(format!("Sent {}", command.id().label())),
            Err(e) => {
                error!("Sending {:?} failed: {}", command.id(), e);
                self.feedback
                    .error(format!("{} not sent: {}", command.id().label(), e));
            }
        }
        result
    }

    /// Extension point for manufacturer-specific actions.
    pub fn custom_command(&mut self) {
        self.feedback.info("OnDoSomethingClicked");
    }

    fn publish_devices(&self) {
        self.feedback
            .send(AppEvent::DevicesChanged(self.cache.summaries()));
    }
}

/// Link operations on the stack can stall for a long time; shutdown must not
/// wait for them.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = T>,
) -> Result<T, BleError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BleError::Cancelled),
        output = work => Ok(output),
    }
}

async fn next_event<D>(rx: &mut Option<EnumerationReceiver<D>>) -> Option<EnumerationEvent<D>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::CommandId;
    use crate::domain::feedback::{feedback_queue, DisplaySink, FeedbackQueue};
    use crate::domain::models::FeedbackMessage;
    use crate::domain::settings::{
        DEFAULT_COMMAND_CHAR_UUID, DEFAULT_SENSOR_CHAR_UUID, DEFAULT_SERVICE_UUID,
    };
    use crate::infrastructure::bluetooth::mock::{
        MockBleProvider, MockCharacteristic, MockDevice, MockService,
    };

    #[derive(Default)]
    struct Lines {
        lines: Vec<String>,
        devices: Option<Vec<String>>,
    }

    impl DisplaySink for Lines {
        fn append_line(&mut self, message: FeedbackMessage) {
            self.lines.push(message.text().to_string());
        }
        fn scroll_to_bottom(&mut self) {}
        fn apply_event(&mut self, event: AppEvent) {
            if let AppEvent::DevicesChanged(devices) = event {
                self.devices = Some(devices.into_iter().map(|d| d.id).collect());
            }
        }
    }

    fn drain(queue: &mut FeedbackQueue) -> Lines {
        let mut lines = Lines::default();
        queue.drain_into(&mut lines);
        lines
    }

    fn service_with(
        devices: Vec<MockDevice>,
        filter: &str,
    ) -> (BluetoothService<MockBleProvider>, FeedbackQueue) {
        let (sender, queue) = feedback_queue();
        let config = ServiceConfig {
            name_filter: filter.to_string(),
            profile: DeviceProfile::default(),
        };
        let service = BluetoothService::new(
            MockBleProvider::new(devices),
            sender,
            config,
            CancellationToken::new(),
        );
        (service, queue)
    }

    fn pump(service: &mut BluetoothService<MockBleProvider>) {
        let mut events = Vec::new();
        if let Some(rx) = service.enumeration.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            service.handle_enumeration_event(event);
        }
    }

    fn ready_device(id: &str, name: &str, command: &MockCharacteristic) -> MockDevice {
        MockDevice::new(id, name).with_service(MockService::new(
            DEFAULT_SERVICE_UUID,
            vec![
                command.clone(),
                MockCharacteristic::new("Sensor", DEFAULT_SENSOR_CHAR_UUID),
            ],
        ))
    }

    #[test]
    fn test_added_devices_are_cached_once() {
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![MockDevice::new("A", "Widget")]);
        service.on_devices_added(vec![MockDevice::new("A", "Widget v2")]);

        assert_eq!(service.cache().len(), 1);
        assert_eq!(service.cache().get("A").map(|d| d.name()), Some("Widget"));
        let lines = drain(&mut queue).lines;
        assert_eq!(
            lines,
            vec![
                "BTLE Device added: Widget",
                "BTLE Device found: Widget",
                "BTLE Duplicate device seen: Widget v2",
            ]
        );
    }

    #[test]
    fn test_filter_limits_announcements_not_cache() {
        let (mut service, mut queue) = service_with(vec![], "Wid");
        service.on_devices_added(vec![
            MockDevice::new("A", "Widget"),
            MockDevice::new("B", "Gadget"),
        ]);

        assert_eq!(service.cache().ids(), vec!["A", "B"]);
        let lines = drain(&mut queue).lines;
        assert_eq!(
            lines,
            vec![
                "BTLE Device added: Widget",
                "Filtered BTLE Device found: Widget",
                "BTLE Device added: Gadget",
            ]
        );
    }

    #[test]
    fn test_removing_unknown_device_is_silent() {
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![MockDevice::new("A", "Widget")]);
        drain(&mut queue);

        service.on_devices_removed(vec![RemovedDevice { id: "Z".to_string() }]);
        assert_eq!(service.cache().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_removing_selected_device_clears_selection() {
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![MockDevice::new("A", "Widget")]);
        service.select("A");
        assert_eq!(service.selected(), Some("A"));

        service.on_devices_removed(vec![RemovedDevice { id: "A".to_string() }]);
        assert_eq!(service.selected(), None);
        let drained = drain(&mut queue);
        assert!(drained.lines.contains(&"removed: Widget".to_string()));
        assert_eq!(drained.devices, Some(vec![]));
    }

    #[tokio::test]
    async fn test_connect_services_without_selection_is_noop() {
        let (mut service, mut queue) = service_with(vec![], "");
        assert_eq!(service.connect_services().await, None);
        let lines = drain(&mut queue).lines;
        assert_eq!(lines, vec!["OnConnectServicesClicked", "no device selected"]);
    }

    #[tokio::test]
    async fn test_enumerate_connect_discover_and_send() {
        let command = MockCharacteristic::new("Command", DEFAULT_COMMAND_CHAR_UUID);
        let (mut service, mut queue) = service_with(vec![ready_device("A", "Widget", &command)], "");

        service.start_enumeration();
        pump(&mut service);
        service.select("A");

        let outcome = service.connect_services().await;
        assert_eq!(outcome, Some(DiscoveryOutcome::Ready));
        assert_eq!(
            service.cache().get("A").map(|d| d.state()),
            Some(DeviceState::Ready)
        );

        service
            .send_command(&Command::for_id(CommandId::MoveRight))
            .await
            .unwrap();
        assert_eq!(command.writes(), vec![vec![0x02]]);

        let lines = drain(&mut queue).lines;
        assert!(lines.contains(&"Sent Move Right".to_string()));
    }

    #[tokio::test]
    async fn test_end_to_end_cache_and_missing_command_channel() {
        let (mut service, mut queue) = service_with(
            vec![MockDevice::new("A", "Widget"), MockDevice::new("B", "Gadget")],
            "",
        );

        service.handle_command(BluetoothCommand::StartEnumeration).await;
        pump(&mut service);
        assert_eq!(service.cache().ids(), vec!["A", "B"]);

        service.on_devices_removed(vec![RemovedDevice { id: "A".to_string() }]);
        assert_eq!(service.cache().ids(), vec!["B"]);

        service.select("B");
        let err = service
            .send_command(&Command::for_id(CommandId::MoveLeft))
            .await
            .unwrap_err();
        assert_eq!(err, BleError::NoCommandChannel);

        let lines = drain(&mut queue).lines;
        assert!(lines.iter().any(|l| l.contains("no command channel")));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let command = MockCharacteristic::new("Command", DEFAULT_COMMAND_CHAR_UUID).failing_writes();
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![ready_device("A", "Widget", &command)]);
        service.select("A");
        service.connect_services().await;

        let err = service
            .send_command(&Command::for_id(CommandId::GetBattery))
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::WriteFailed(_)));
        let lines = drain(&mut queue).lines;
        assert!(lines.iter().any(|l| l.starts_with("Get Battery not sent")));
    }

    #[tokio::test]
    async fn test_run_loop_processes_commands_and_live_events() {
        let command = MockCharacteristic::new("Command", DEFAULT_COMMAND_CHAR_UUID);
        let provider = MockBleProvider::new(vec![MockDevice::new("A", "Widget")]);
        let enumerator = provider.enumerator();
        let (sender, mut queue) = feedback_queue();
        let cancel = CancellationToken::new();
        let service = BluetoothService::new(
            provider,
            sender,
            ServiceConfig::default(),
            cancel.clone(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        // Device futures are not Send, so drive the loop on this task.
        let driver = async {
            tx.send(BluetoothCommand::StartEnumeration).unwrap();
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert!(enumerator.add(vec![ready_device("B", "Gadget", &command)]));
            tx.send(BluetoothCommand::CustomCommand).unwrap();
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        tokio::join!(service.run(rx), driver);

        let drained = drain(&mut queue);
        assert!(drained.lines.contains(&"OnEnumerateClicked".to_string()));
        assert!(drained.lines.contains(&"BTLE Device found: Gadget".to_string()));
        assert!(drained.lines.contains(&"OnDoSomethingClicked".to_string()));
        assert_eq!(drained.devices, Some(vec!["A".to_string(), "B".to_string()]));
    }
    #[tokio::test]
    async fn test_disconnect_returns_device_to_disconnected() {
        let command = MockCharacteristic::new("Command", DEFAULT_COMMAND_CHAR_UUID);
        let mock = ready_device("A", "Widget", &command);
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![mock.clone()]);
        service.select("A");
        assert_eq!(service.connect_services().await, Some(DiscoveryOutcome::Ready));

        service.handle_command(BluetoothCommand::Disconnect).await;

        let device = service.cache().get("A").unwrap();
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(!device.has_command_channel());
        assert!(!device.has_sensor());
        assert!(!mock.is_connected().await);
        let err = service
            .send_command(&Command::for_id(CommandId::MoveLeft))
            .await
            .unwrap_err();
        assert_eq!(err, BleError::NoCommandChannel);
        assert!(command.writes().is_empty());
        let lines = drain(&mut queue).lines;
        assert!(lines.contains(&"OnDisconnectClicked".to_string()));
        assert!(lines.contains(&"BTLE device disconnected".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_without_selection_is_noop() {
        let (mut service, mut queue) = service_with(vec![], "");
        assert!(!service.disconnect_selected().await);
        let lines = drain(&mut queue).lines;
        assert_eq!(lines, vec!["OnDisconnectClicked", "no device selected"]);
    }

    #[tokio::test]
    async fn test_cancel_abandons_stalled_connect() {
        let mock = MockDevice::new("A", "Widget")
            .with_service(MockService::new(DEFAULT_SERVICE_UUID, vec![]))
            .hanging_connect();
        let (mut service, mut queue) = service_with(vec![], "");
        service.on_devices_added(vec![mock.clone()]);
        service.select("A");
        service.cancel.cancel();

        assert!(!service.connect_selected().await);
        assert_eq!(service.connect_services().await, None);

        let lines = drain(&mut queue).lines;
        assert_eq!(
            lines
                .iter()
                .filter(|l| l.as_str() == "operation cancelled")
                .count(),
            2
        );
        assert_eq!(mock.connect_attempts(), 0);
        assert_eq!(
            service.cache().get("A").map(|d| d.state()),
            Some(DeviceState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_run_loop_exits_on_cancel_during_connect() {
        let mock = MockDevice::new("A", "Widget").hanging_connect();
        let (sender, _queue) = feedback_queue();
        let cancel = CancellationToken::new();
        let mut service = BluetoothService::new(
            MockBleProvider::new(vec![]),
            sender,
            ServiceConfig::default(),
            cancel.clone(),
        );
        service.on_devices_added(vec![mock.clone()]);
        service.select("A");

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = async {
            tx.send(BluetoothCommand::Connect).unwrap();
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        tokio::join!(service.run(rx), driver);

        assert_eq!(mock.connect_attempts(), 1);
        assert!(tx.send(BluetoothCommand::CustomCommand).is_err());
    }
}
