use crate::domain::command::Command;

/// Connection lifecycle of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    ServiceDiscovering,
    Ready,
}

impl DeviceState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING...",
            Self::Connected => "CONNECTED",
            Self::ServiceDiscovering => "DISCOVERING...",
            Self::Ready => "READY",
        }
    }
}

/// What the UI needs to list a cached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// A single immutable line of the feedback log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackMessage {
    text: String,
    severity: MessageSeverity,
}

impl FeedbackMessage {
    pub fn new(text: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, MessageSeverity::Info)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn severity(&self) -> MessageSeverity {
        self.severity
    }
}

/// Events flowing from the BLE thread to the UI thread.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Feedback(FeedbackMessage),
    DevicesChanged(Vec<DeviceSummary>),
    DeviceState { id: String, state: DeviceState },
    SensorValue { id: String, value: Vec<u8> },
    Enumerating(bool),
}

/// Requests flowing from the UI thread to the BLE thread.
#[derive(Debug, Clone)]
pub enum BluetoothCommand {
    StartEnumeration,
    StopEnumeration,
    Select(String),
    Connect,
    ConnectServices,
    Disconnect,
    Send(Command),
    CustomCommand,
}
