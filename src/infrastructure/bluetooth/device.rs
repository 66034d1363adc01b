//! Sample Device
//!
//! Wraps one discovered peripheral: connection state, discovery of the
//! command and sensor characteristics, and command dispatch. Every step is
//! reported through the attached feedback sender.

use crate::domain::command::Command;
use crate::domain::feedback::FeedbackSender;
use crate::domain::models::{AppEvent, DeviceState, DeviceSummary, MessageSeverity};
use crate::domain::settings::DeviceProfile;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::{characteristic_matches, service_matches};
use crate::infrastructure::bluetooth::provider::{
    BleDevice, CharacteristicOf, GattCharacteristic, GattService, ValueChangedHandler,
};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Characteristics that discovery must find for the device to be usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredCharacteristic {
    Command,
    Sensor,
}

impl fmt::Display for RequiredCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Sensor => write!(f, "sensor"),
        }
    }
}

/// Result of a completed service scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Every required characteristic was found.
    Ready,
    /// The service exists but some required characteristics do not.
    PartiallyDiscovered { missing: Vec<RequiredCharacteristic> },
    /// No service matched the configured UUID.
    NotFound,
}

pub struct SampleDevice<D: BleDevice> {
    device: D,
    profile: DeviceProfile,
    state: DeviceState,
    service: Option<D::Service>,
    command_characteristic: Option<CharacteristicOf<D>>,
    sensor_characteristic: Option<CharacteristicOf<D>>,
    service_count: usize,
    feedback: Option<FeedbackSender>,
}

impl<D: BleDevice> SampleDevice<D> {
    pub fn new(device: D, profile: DeviceProfile) -> Self {
        Self {
            device,
            profile,
            state: DeviceState::Disconnected,
            service: None,
            command_characteristic: None,
            sensor_characteristic: None,
            service_count: 0,
            feedback: None,
        }
    }

    /// Route this device's status lines to `feedback`.
    pub fn attach_feedback(&mut self, feedback: FeedbackSender) {
        self.feedback = Some(feedback);
    }

    pub fn id(&self) -> &str {
        self.device.id()
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn service_count(&self) -> usize {
        self.service_count
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    pub fn has_command_channel(&self) -> bool {
        self.command_characteristic.is_some()
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor_characteristic.is_some()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id().to_string(),
            name: self.name().to_string(),
            state: self.state,
        }
    }

    /// Connect to the peripheral unless the stack already reports a link.
    ///
    /// Returns whether the device ended up connected. No retry happens here.
    pub async fn connect(&mut self) -> bool {
        self.show_feedback("Connect");

        let connected = if self.device.is_connected().await {
            self.show_feedback("BTLE device Connected");
            true
        } else {
            self.show_feedback("BTLE device wasn't connected, trying to connect");
            self.set_state(DeviceState::Connecting);
            match self.device.connect().await {
                Ok(connected) => connected,
                Err(e) => {
                    error!("Connecting to {} failed: {}", self.id(), e);
                    self.report(format!("Connect error: {}", e), MessageSeverity::Error);
                    false
                }
            }
        };

        if connected {
            self.report("BTLE Device connected", MessageSeverity::Success);
            if matches!(
                self.state,
                DeviceState::Disconnected | DeviceState::Connecting
            ) {
                self.set_state(DeviceState::Connected);
            }
        } else {
            self.report("BTLE device not connected", MessageSeverity::Warning);
            self.set_state(DeviceState::Disconnected);
        }

        connected
    }

    /// Locate the sample service and its command and sensor characteristics.
    ///
    /// An empty characteristic list is re-queried after a real delay, up to
    /// the configured number of retries. `cancel` aborts the wait.
    pub async fn connect_service(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, BleError> {
        self.release_sensor();
        self.service = None;
        self.command_characteristic = None;
        self.set_state(DeviceState::ServiceDiscovering);

        let result = self.discover(cancel).await;

        let settled = if matches!(result, Ok(DiscoveryOutcome::Ready)) {
            DeviceState::Ready
        } else if self.device.is_connected().await {
            DeviceState::Connected
        } else {
            DeviceState::Disconnected
        };
        self.set_state(settled);

        if let Err(e) = &result {
            warn!("Service discovery on {} failed: {}", self.id(), e);
            self.report(format!("Service discovery failed: {}", e), MessageSeverity::Error);
        }
        result
    }

    async fn discover(&mut self, cancel: &CancellationToken) -> Result<DiscoveryOutcome, BleError> {
        let services = self.device.services().await?;
        self.service_count = services.len();
        self.show_feedback(format!("Device service count: {}", self.service_count));

        let mut selected = None;
        for service in services {
            let name = service.name();
            self.show_feedback(name.as_str());
            if selected.is_none() && service_matches(&name, &self.profile.service_uuid) {
                selected = Some(service);
            }
        }

        let Some(service) = selected else {
            self.report("Service not found", MessageSeverity::Warning);
            return Ok(DiscoveryOutcome::NotFound);
        };
        self.show_feedback("Service found");

        let mut characteristics = service.characteristics().await?;
        self.show_feedback(format!("Characteristics count: {}", characteristics.len()));

        let mut retries_left = self.profile.discovery_retries;
        while characteristics.is_empty() && retries_left > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BleError::Cancelled),
                _ = tokio::time::sleep(self.profile.retry_delay()) => {}
            }
            retries_left -= 1;
            characteristics = service.characteristics().await?;
        }
        if characteristics.is_empty() {
            self.report("No characteristics after retries", MessageSeverity::Warning);
        }
        self.show_feedback(format!("Characteristics count: {}", characteristics.len()));

        for characteristic in characteristics {
            let uuid = characteristic.uuid();
            self.show_feedback(format!("Characteristic Name: {}", characteristic.name()));
            self.show_feedback(format!("Characteristic UUID: {}", uuid));

            if characteristic_matches(&uuid, &self.profile.command_char_uuid) {
                self.show_feedback("Command characteristic found");
                self.command_characteristic = Some(characteristic);
                continue;
            }

            if characteristic_matches(&uuid, &self.profile.sensor_char_uuid) {
                self.show_feedback("Sensor characteristic found");
                self.subscribe_sensor(&characteristic).await;
                self.sensor_characteristic = Some(characteristic);
            }
        }
        self.service = Some(service);

        let mut missing = Vec::new();
        if self.command_characteristic.is_none() {
            missing.push(RequiredCharacteristic::Command);
        }
        if self.profile.require_sensor && self.sensor_characteristic.is_none() {
            missing.push(RequiredCharacteristic::Sensor);
        }

        if missing.is_empty() {
            info!("Device {} ready", self.id());
            self.report("Device ready", MessageSeverity::Success);
            Ok(DiscoveryOutcome::Ready)
        } else {
            let names: Vec<String> = missing.iter().map(|m| m.to_string()).collect();
            self.report(
                format!("Missing characteristics: {}", names.join(", ")),
                MessageSeverity::Warning,
            );
            Ok(DiscoveryOutcome::PartiallyDiscovered { missing })
        }
    }

    /// Subscription failures are reported, never fatal.
    async fn subscribe_sensor(&self, characteristic: &CharacteristicOf<D>) {
        let feedback = self.feedback.clone();
        let id = self.id().to_string();
        let handler: ValueChangedHandler = Box::new(move |value| {
            // Payload meaning is manufacturer specific; pass the bytes through.
            if let Some(feedback) = &feedback {
                feedback.info("SensorCharacteristic_ValueChanged");
                feedback.send(AppEvent::SensorValue {
                    id: id.clone(),
                    value,
                });
            }
        });

        if let Err(e) = characteristic.on_value_changed(handler) {
            self.report(
                format!("Could not register sensor handler: {}", e),
                MessageSeverity::Warning,
            );
        }

        match characteristic.set_notify().await {
            Ok(true) => self.show_feedback("Sensor notifications enabled"),
            Ok(false) => self.report("Sensor notify was refused", MessageSeverity::Warning),
            Err(e) => self.report(
                format!("Sensor notify failed: {}", e),
                MessageSeverity::Warning,
            ),
        }
    }

    /// Unhook the sensor handler so a later discovery does not stack a
    /// second one on the same platform characteristic.
    fn release_sensor(&mut self) {
        let Some(sensor) = self.sensor_characteristic.take() else {
            return;
        };
        if let Err(e) = sensor.clear_value_changed() {
            warn!("Releasing sensor handler on {} failed: {}", self.id(), e);
        }
    }

    /// Write `command` to the command characteristic.
    pub async fn send(&self, command: &Command) -> Result<(), BleError> {
        let characteristic = self
            .command_characteristic
            .as_ref()
            .ok_or(BleError::NoCommandChannel)?;
        command.send(characteristic).await
    }

    /// Drop the discovered handles and close the link.
    pub async fn disconnect(&mut self) -> Result<(), BleError> {
        self.show_feedback("Disconnect");
        self.release_sensor();
        self.service = None;
        self.command_characteristic = None;
        let result = self.device.disconnect().await;
        match &result {
            Ok(()) => self.show_feedback("BTLE device disconnected"),
            Err(e) => {
                error!("Disconnecting {} failed: {}", self.id(), e);
                self.report(format!("Disconnect error: {}", e), MessageSeverity::Error);
            }
        }
        self.set_state(DeviceState::Disconnected);
        result
    }

    /// Append to the feedback log if one is attached.
    pub fn show_feedback(&self, msg: impl Into<String>) {
        self.report(msg, MessageSeverity::Info);
    }

    fn report(&self, msg: impl Into<String>, severity: MessageSeverity) {
        if let Some(feedback) = &self.feedback {
            feedback.message(msg, severity);
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(feedback) = &self.feedback {
            feedback.send(AppEvent::DeviceState {
                id: self.id().to_string(),
                state,
            });
        }
    }
}
