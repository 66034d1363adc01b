//! BLE Provider Interface
//!
//! The narrow slice of a platform BLE stack that the sample needs. The WinRT
//! backend and the in-memory mock both implement these traits, so the rest
//! of the application never names a platform type.
//!
//! Futures are not required to be `Send`: every handle lives on the
//! dedicated BLE thread, which runs a current-thread runtime.

use crate::infrastructure::bluetooth::error::BleError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Callback invoked by the platform when a notified value changes.
pub type ValueChangedHandler = Box<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

/// A device the enumerator no longer sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedDevice {
    pub id: String,
}

/// Emitted by a running enumeration.
#[derive(Debug)]
pub enum EnumerationEvent<D> {
    Added(Vec<D>),
    Removed(Vec<RemovedDevice>),
    /// The initial sweep finished; further events are live updates.
    Completed,
}

pub trait BleProvider {
    type Device: BleDevice + 'static;

    /// Begin discovering devices. Any enumeration already running is replaced.
    fn start_enumeration(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<EnumerationEvent<Self::Device>>, BleError>;

    fn stop_enumeration(&mut self) -> Result<(), BleError>;
}

#[async_trait(?Send)]
pub trait BleDevice {
    type Service: GattService;

    /// Platform-stable identifier, used as the cache key.
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    async fn is_connected(&self) -> bool;

    /// Ask the stack to connect. `Ok(false)` means the stack refused.
    async fn connect(&self) -> Result<bool, BleError>;

    /// Optional: release the link.
    async fn disconnect(&self) -> Result<(), BleError> {
        Ok(())
    }

    async fn services(&self) -> Result<Vec<Self::Service>, BleError>;
}

#[async_trait(?Send)]
pub trait GattService {
    type Characteristic: GattCharacteristic + 'static;

    /// Display name. Contains the service UUID on every backend.
    fn name(&self) -> String;

    /// Characteristics known right now. May be empty until the stack has
    /// finished its own discovery.
    async fn characteristics(&self) -> Result<Vec<Self::Characteristic>, BleError>;
}

/// Write side of a characteristic.
#[async_trait(?Send)]
pub trait CharacteristicWriter {
    async fn write_value(&self, bytes: &[u8]) -> Result<(), BleError>;
}

#[async_trait(?Send)]
pub trait GattCharacteristic: CharacteristicWriter {
    fn name(&self) -> String;
    fn uuid(&self) -> String;

    /// Register the value-changed callback. Platform stacks keep every
    /// registration, so callers release the previous one first.
    fn on_value_changed(&self, handler: ValueChangedHandler) -> Result<(), BleError>;

    /// Drop every callback registered through this handle.
    fn clear_value_changed(&self) -> Result<(), BleError>;

    /// Enable notify on the wire. Without it no values are delivered.
    async fn set_notify(&self) -> Result<bool, BleError>;
}

/// Characteristic type reachable from a device type.
pub type CharacteristicOf<D> = <<D as BleDevice>::Service as GattService>::Characteristic;
