//! In-memory BLE backend.
//!
//! Used when no radio is available and by the tests. Devices, services and
//! characteristics share state through `Arc`, so a test can keep a clone of
//! any handle and inspect what the application did with it.

use crate::domain::settings::DeviceProfile;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::provider::{
    BleDevice, BleProvider, CharacteristicWriter, EnumerationEvent, GattCharacteristic,
    GattService, RemovedDevice, ValueChangedHandler,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CharacteristicState {
    name: String,
    uuid: String,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_handler: AtomicBool,
    notify: Mutex<NotifyReply>,
    notify_enabled: AtomicBool,
    handlers: Mutex<Vec<ValueChangedHandler>>,
}

#[derive(Clone, Copy)]
enum NotifyReply {
    Accept,
    Refuse,
    Fail,
}

#[derive(Clone)]
pub struct MockCharacteristic {
    inner: Arc<CharacteristicState>,
}

impl MockCharacteristic {
    pub fn new(name: &str, uuid: &str) -> Self {
        Self {
            inner: Arc::new(CharacteristicState {
                name: name.to_string(),
                uuid: uuid.to_string(),
                writes: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                fail_handler: AtomicBool::new(false),
                notify: Mutex::new(NotifyReply::Accept),
                notify_enabled: AtomicBool::new(false),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every write fails with [`BleError::WriteFailed`].
    pub fn failing_writes(self) -> Self {
        self.inner.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Registering a value-changed handler fails.
    pub fn failing_handler(self) -> Self {
        self.inner.fail_handler.store(true, Ordering::SeqCst);
        self
    }

    /// The peripheral answers the CCCD write with an error status.
    pub fn refusing_notify(self) -> Self {
        *lock(&self.inner.notify) = NotifyReply::Refuse;
        self
    }

    /// The CCCD write itself fails.
    pub fn failing_notify(self) -> Self {
        *lock(&self.inner.notify) = NotifyReply::Fail;
        self
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.inner.handlers).len()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes).clone()
    }

    pub fn notify_enabled(&self) -> bool {
        self.inner.notify_enabled.load(Ordering::SeqCst)
    }

    /// Push a value as the peripheral would, to every registered handler.
    /// Returns false if nothing is listening.
    pub fn emit_value(&self, value: &[u8]) -> bool {
        if !self.notify_enabled() {
            return false;
        }
        let handlers = lock(&self.inner.handlers);
        for handler in handlers.iter() {
            handler(value.to_vec());
        }
        !handlers.is_empty()
    }
}

#[async_trait(?Send)]
impl CharacteristicWriter for MockCharacteristic {
    async fn write_value(&self, bytes: &[u8]) -> Result<(), BleError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(BleError::WriteFailed(format!(
                "mock characteristic {} rejects writes",
                self.inner.uuid
            )));
        }
        debug!("Mock write to {}: {:02X?}", self.inner.uuid, bytes);
        lock(&self.inner.writes).push(bytes.to_vec());
        Ok(())
    }
}

#[async_trait(?Send)]
impl GattCharacteristic for MockCharacteristic {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn uuid(&self) -> String {
        self.inner.uuid.clone()
    }

    fn on_value_changed(&self, handler: ValueChangedHandler) -> Result<(), BleError> {
        if self.inner.fail_handler.load(Ordering::SeqCst) {
            return Err(BleError::Gatt(format!(
                "mock characteristic {} rejects handlers",
                self.inner.uuid
            )));
        }
        lock(&self.inner.handlers).push(handler);
        Ok(())
    }

    fn clear_value_changed(&self) -> Result<(), BleError> {
        lock(&self.inner.handlers).clear();
        Ok(())
    }

    async fn set_notify(&self) -> Result<bool, BleError> {
        let reply = *lock(&self.inner.notify);
        match reply {
            NotifyReply::Accept => {
                self.inner.notify_enabled.store(true, Ordering::SeqCst);
                Ok(true)
            }
            NotifyReply::Refuse => Ok(false),
            NotifyReply::Fail => Err(BleError::Gatt(format!(
                "mock characteristic {} has no CCCD",
                self.inner.uuid
            ))),
        }
    }
}

#[derive(Clone)]
pub struct MockService {
    name: String,
    characteristics: Vec<MockCharacteristic>,
    empty_polls: u32,
    polls: Arc<AtomicU32>,
}

impl MockService {
    /// The service name wraps the UUID in braces, as WinRT formats GUIDs.
    pub fn new(uuid: &str, characteristics: Vec<MockCharacteristic>) -> Self {
        Self {
            name: format!("{{{}}}", uuid),
            characteristics,
            empty_polls: 0,
            polls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Report an empty characteristic list for the first `polls` queries.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.empty_polls = polls;
        self
    }

    /// How many times the characteristic list was queried.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl GattService for MockService {
    type Characteristic = MockCharacteristic;

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn characteristics(&self) -> Result<Vec<MockCharacteristic>, BleError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if poll < self.empty_polls {
            return Ok(Vec::new());
        }
        Ok(self.characteristics.clone())
    }
}

#[derive(Clone, Copy)]
enum ConnectReply {
    Answer,
    Error,
    Hang,
}

struct DeviceInner {
    id: String,
    name: String,
    connected: AtomicBool,
    accepts_connections: AtomicBool,
    connect: Mutex<ConnectReply>,
    connect_attempts: AtomicU32,
    services: Mutex<Vec<MockService>>,
}

#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<DeviceInner>,
}

impl MockDevice {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id: id.to_string(),
                name: name.to_string(),
                connected: AtomicBool::new(false),
                accepts_connections: AtomicBool::new(true),
                connect: Mutex::new(ConnectReply::Answer),
                connect_attempts: AtomicU32::new(0),
                services: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_service(self, service: MockService) -> Self {
        lock(&self.inner.services).push(service);
        self
    }

    pub fn already_connected(self) -> Self {
        self.inner.connected.store(true, Ordering::SeqCst);
        self
    }

    pub fn refusing_connections(self) -> Self {
        self.inner.accepts_connections.store(false, Ordering::SeqCst);
        self
    }

    /// `connect` fails with [`BleError::ConnectionFailed`].
    pub fn erroring_connect(self) -> Self {
        *lock(&self.inner.connect) = ConnectReply::Error;
        self
    }

    /// `connect` never completes.
    pub fn hanging_connect(self) -> Self {
        *lock(&self.inner.connect) = ConnectReply::Hang;
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl BleDevice for MockDevice {
    type Service = MockService;

    fn id(&self) -> &str {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<bool, BleError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let reply = *lock(&self.inner.connect);
        match reply {
            ConnectReply::Answer => {}
            ConnectReply::Error => {
                return Err(BleError::ConnectionFailed(format!(
                    "mock device {} is out of range",
                    self.inner.id
                )))
            }
            ConnectReply::Hang => std::future::pending::<()>().await,
        }
        let accepted = self.inner.accepts_connections.load(Ordering::SeqCst);
        self.inner.connected.store(accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn services(&self) -> Result<Vec<MockService>, BleError> {
        Ok(lock(&self.inner.services).clone())
    }
}

type EventSender = mpsc::UnboundedSender<EnumerationEvent<MockDevice>>;

/// Injects enumeration events into a running mock enumeration.
#[derive(Clone)]
pub struct MockEnumerator {
    sender: Arc<Mutex<Option<EventSender>>>,
}

impl MockEnumerator {
    /// Returns false when no enumeration is running.
    pub fn add(&self, devices: Vec<MockDevice>) -> bool {
        self.push(EnumerationEvent::Added(devices))
    }

    pub fn remove(&self, ids: &[&str]) -> bool {
        let removed = ids
            .iter()
            .map(|id| RemovedDevice { id: id.to_string() })
            .collect();
        self.push(EnumerationEvent::Removed(removed))
    }

    fn push(&self, event: EnumerationEvent<MockDevice>) -> bool {
        match lock(&self.sender).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

pub struct MockBleProvider {
    devices: Vec<MockDevice>,
    sender: Arc<Mutex<Option<EventSender>>>,
}

impl MockBleProvider {
    /// A provider whose enumeration reports `devices` in its first sweep.
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// A handful of devices shaped after `profile`, for running the UI
    /// without hardware.
    pub fn demo(profile: &DeviceProfile) -> Self {
        let widget = MockDevice::new("mock:widget", "Widget").with_service(
            MockService::new(
                &profile.service_uuid,
                vec![
                    MockCharacteristic::new("Command", &profile.command_char_uuid),
                    MockCharacteristic::new("Sensor", &profile.sensor_char_uuid),
                ],
            )
            .ready_after(2),
        );
        let gadget = MockDevice::new("mock:gadget", "Gadget").with_service(MockService::new(
            "0000180F-0000-1000-8000-00805F9B34FB",
            vec![MockCharacteristic::new(
                "Battery Level",
                "00002A19-0000-1000-8000-00805F9B34FB",
            )],
        ));
        let gizmo = MockDevice::new("mock:gizmo", "Gizmo").refusing_connections();
        Self::new(vec![widget, gadget, gizmo])
    }

    pub fn enumerator(&self) -> MockEnumerator {
        MockEnumerator {
            sender: self.sender.clone(),
        }
    }
}

impl BleProvider for MockBleProvider {
    type Device = MockDevice;

    fn start_enumeration(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<EnumerationEvent<MockDevice>>, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        info!("Mock enumeration started with {} devices", self.devices.len());
        if !self.devices.is_empty() {
            let _ = tx.send(EnumerationEvent::Added(self.devices.clone()));
        }
        let _ = tx.send(EnumerationEvent::Completed);
        *lock(&self.sender) = Some(tx);
        Ok(rx)
    }

    fn stop_enumeration(&mut self) -> Result<(), BleError> {
        lock(&self.sender).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enumeration_reports_initial_sweep_then_live_events() {
        let mut provider = MockBleProvider::new(vec![MockDevice::new("A", "Widget")]);
        let enumerator = provider.enumerator();
        assert!(!enumerator.add(vec![MockDevice::new("B", "Gadget")]));

        let mut rx = provider.start_enumeration().unwrap();
        assert!(matches!(rx.recv().await, Some(EnumerationEvent::Added(d)) if d.len() == 1));
        assert!(matches!(rx.recv().await, Some(EnumerationEvent::Completed)));

        assert!(enumerator.remove(&["A"]));
        assert!(matches!(
            rx.recv().await,
            Some(EnumerationEvent::Removed(r)) if r == vec![RemovedDevice { id: "A".to_string() }]
        ));

        provider.stop_enumeration().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_characteristic() {
        let characteristic = MockCharacteristic::new("Command", "1234").failing_writes();
        assert!(characteristic.write_value(&[1]).await.is_err());
        assert!(characteristic.writes().is_empty());
        assert!(!characteristic.emit_value(&[1]));
    }
}
