//! WinRT Backend
//!
//! Device enumeration through `DeviceWatcher` and GATT access through
//! `Windows.Devices.Bluetooth`. Handles are created lazily on the BLE thread.

use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::provider::{
    BleDevice, BleProvider, CharacteristicWriter, EnumerationEvent, GattCharacteristic,
    GattService, RemovedDevice, ValueChangedHandler,
};
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::core::{IInspectable, Ref, GUID, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinGattCharacteristic,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, DeviceWatcher,
    DeviceWatcherStatus,
};
use windows::Foundation::Collections::IIterable;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

/// Association endpoints speaking Bluetooth LE, paired or not.
const BLE_ENDPOINT_FILTER: &str =
    r#"System.Devices.Aep.ProtocolId:="{bb7bb05e-5972-42b5-94fc-76eaa7084d49}""#;

const WATCHER_PROPERTIES: [&str; 2] = [
    "System.Devices.Aep.DeviceAddress",
    "System.Devices.Aep.IsConnected",
];

fn platform(e: windows::core::Error) -> BleError {
    BleError::Platform(e.to_string())
}

/// Uppercase, braced: `{358407F4-BF93-408A-B128-57515EBAF150}`.
fn format_guid(guid: &GUID) -> String {
    format!("{{{:?}}}", guid)
}

fn check_status(status: GattCommunicationStatus, what: &str) -> Result<(), BleError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(BleError::Gatt(format!("{} returned {:?}", what, status)))
    }
}

pub struct WinRtCharacteristic {
    characteristic: WinGattCharacteristic,
    uuid: String,
    value_changed: Cell<Option<i64>>,
}

impl WinRtCharacteristic {
    fn new(characteristic: WinGattCharacteristic) -> Result<Self, BleError> {
        let uuid = format_guid(&characteristic.Uuid().map_err(platform)?);
        Ok(Self {
            characteristic,
            uuid,
            value_changed: Cell::new(None),
        })
    }
}

impl Drop for WinRtCharacteristic {
    fn drop(&mut self) {
        if let Err(e) = self.clear_value_changed() {
            debug!("ValueChanged cleanup on {} failed: {}", self.uuid, e);
        }
    }
}

#[async_trait(?Send)]
impl CharacteristicWriter for WinRtCharacteristic {
    async fn write_value(&self, bytes: &[u8]) -> Result<(), BleError> {
        let writer = DataWriter::new().map_err(platform)?;
        writer.WriteBytes(bytes).map_err(platform)?;
        let buffer = writer.DetachBuffer().map_err(platform)?;

        let status = self
            .characteristic
            .WriteValueAsync(&buffer)
            .map_err(platform)?
            .await
            .map_err(|e| BleError::WriteFailed(e.to_string()))?;
        if status != GattCommunicationStatus::Success {
            return Err(BleError::WriteFailed(format!("{:?}", status)));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl GattCharacteristic for WinRtCharacteristic {
    fn name(&self) -> String {
        self.characteristic
            .UserDescription()
            .map(|d| d.to_string())
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.uuid.clone())
    }

    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn on_value_changed(&self, handler: ValueChangedHandler) -> Result<(), BleError> {
        let value_handler = TypedEventHandler::new(
            move |_: Ref<WinGattCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let buffer = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&buffer)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    handler(bytes);
                }
                Ok(())
            },
        );
        self.clear_value_changed()?;
        let token = self
            .characteristic
            .ValueChanged(&value_handler)
            .map_err(platform)?;
        self.value_changed.set(Some(token));
        Ok(())
    }

    fn clear_value_changed(&self) -> Result<(), BleError> {
        if let Some(token) = self.value_changed.take() {
            self.characteristic
                .RemoveValueChanged(token)
                .map_err(platform)?;
        }
        Ok(())
    }

    async fn set_notify(&self) -> Result<bool, BleError> {
        let status = self
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(platform)?
            .await
            .map_err(platform)?;
        Ok(status == GattCommunicationStatus::Success)
    }
}

pub struct WinRtService {
    service: GattDeviceService,
    name: String,
}

#[async_trait(?Send)]
impl GattService for WinRtService {
    type Characteristic = WinRtCharacteristic;

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn characteristics(&self) -> Result<Vec<WinRtCharacteristic>, BleError> {
        let result = self
            .service
            .GetCharacteristicsAsync()
            .map_err(platform)?
            .await
            .map_err(platform)?;
        check_status(result.Status().map_err(platform)?, "GetCharacteristicsAsync")?;

        let list = result.Characteristics().map_err(platform)?;
        let mut characteristics = Vec::new();
        for i in 0..list.Size().map_err(platform)? {
            let characteristic = list.GetAt(i).map_err(platform)?;
            characteristics.push(WinRtCharacteristic::new(characteristic)?);
        }
        Ok(characteristics)
    }
}

/// A device reported by the watcher. The `BluetoothLEDevice` is opened on
/// first use.
pub struct WinRtDevice {
    id: String,
    name: String,
    device: RefCell<Option<BluetoothLEDevice>>,
    session: RefCell<Option<GattSession>>,
}

impl WinRtDevice {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            device: RefCell::new(None),
            session: RefCell::new(None),
        }
    }

    async fn le_device(&self) -> Result<BluetoothLEDevice, BleError> {
        if let Some(device) = self.device.borrow().as_ref() {
            return Ok(device.clone());
        }
        let device = BluetoothLEDevice::FromIdAsync(&HSTRING::from(self.id.as_str()))
            .map_err(platform)?
            .await
            .map_err(|e| BleError::ConnectionFailed(format!("{}: {}", self.name, e)))?;
        *self.device.borrow_mut() = Some(device.clone());
        Ok(device)
    }

    /// Keeps the link up while the session lives.
    async fn maintain_connection(&self, device: &BluetoothLEDevice) -> Result<(), BleError> {
        if self.session.borrow().is_some() {
            return Ok(());
        }
        let device_id = device.BluetoothDeviceId().map_err(platform)?;
        let session = GattSession::FromDeviceIdAsync(&device_id)
            .map_err(platform)?
            .await
            .map_err(platform)?;
        session.SetMaintainConnection(true).map_err(platform)?;
        *self.session.borrow_mut() = Some(session);
        Ok(())
    }
}

#[async_trait(?Send)]
impl BleDevice for WinRtDevice {
    type Service = WinRtService;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        let device = self.device.borrow().clone();
        device
            .and_then(|d| d.ConnectionStatus().ok())
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    /// WinRT has no explicit connect. A maintained GATT session plus a
    /// service query brings the link up.
    async fn connect(&self) -> Result<bool, BleError> {
        let device = self.le_device().await?;
        if let Err(e) = self.maintain_connection(&device).await {
            warn!("Failed to create GattSession for {}: {}", self.name, e);
        }
        let result = device
            .GetGattServicesAsync()
            .map_err(platform)?
            .await
            .map_err(platform)?;
        debug!("Service query status: {:?}", result.Status());
        Ok(self.is_connected().await)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        if let Some(session) = self.session.borrow_mut().take() {
            session.Close().map_err(platform)?;
        }
        if let Some(device) = self.device.borrow_mut().take() {
            device.Close().map_err(platform)?;
        }
        Ok(())
    }

    async fn services(&self) -> Result<Vec<WinRtService>, BleError> {
        let device = self.le_device().await?;
        let result = device
            .GetGattServicesAsync()
            .map_err(platform)?
            .await
            .map_err(platform)?;
        check_status(result.Status().map_err(platform)?, "GetGattServicesAsync")?;

        let list = result.Services().map_err(platform)?;
        let mut services = Vec::new();
        for i in 0..list.Size().map_err(platform)? {
            let service = list.GetAt(i).map_err(platform)?;
            let name = format_guid(&service.Uuid().map_err(platform)?);
            services.push(WinRtService { service, name });
        }
        Ok(services)
    }
}

type EventSender = mpsc::UnboundedSender<EnumerationEvent<WinRtDevice>>;

/// Enumerates Bluetooth LE devices known to or visible from the system.
#[derive(Default)]
pub struct WinRtBleProvider {
    watcher: Option<DeviceWatcher>,
}

impl WinRtBleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches association endpoints so unpaired peripherals are reported
    /// alongside paired ones. `Removed` only fires while `Updated` has a
    /// handler.
    fn create_watcher(sender: EventSender) -> windows::core::Result<DeviceWatcher> {
        let properties: IIterable<HSTRING> = WATCHER_PROPERTIES
            .iter()
            .map(|p| HSTRING::from(*p))
            .collect::<Vec<_>>()
            .into();
        let watcher = DeviceInformation::CreateWatcherWithKindAqsFilterAndAdditionalProperties(
            &HSTRING::from(BLE_ENDPOINT_FILTER),
            &properties,
            DeviceInformationKind::AssociationEndpoint,
        )?;

        let added = sender.clone();
        watcher.Added(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    let device = WinRtDevice::new(info.Id()?.to_string(), info.Name()?.to_string());
                    let _ = added.send(EnumerationEvent::Added(vec![device]));
                }
                Ok(())
            },
        ))?;

        watcher.Updated(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, _: Ref<DeviceInformationUpdate>| Ok(()),
        ))?;

        let removed = sender.clone();
        watcher.Removed(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, update: Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let id = update.Id()?.to_string();
                    let _ = removed.send(EnumerationEvent::Removed(vec![RemovedDevice { id }]));
                }
                Ok(())
            },
        ))?;

        watcher.EnumerationCompleted(&TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, _: Ref<IInspectable>| {
                let _ = sender.send(EnumerationEvent::Completed);
                Ok(())
            },
        ))?;

        Ok(watcher)
    }
}

impl BleProvider for WinRtBleProvider {
    type Device = WinRtDevice;

    fn start_enumeration(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<EnumerationEvent<WinRtDevice>>, BleError> {
        self.stop_enumeration()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self::create_watcher(tx)
            .map_err(|e| BleError::EnumerationUnavailable(e.to_string()))?;
        watcher
            .Start()
            .map_err(|e| BleError::EnumerationUnavailable(e.to_string()))?;
        info!("DeviceWatcher started");
        self.watcher = Some(watcher);
        Ok(rx)
    }

    fn stop_enumeration(&mut self) -> Result<(), BleError> {
        if let Some(watcher) = self.watcher.take() {
            let status = watcher.Status().map_err(platform)?;
            if matches!(
                status,
                DeviceWatcherStatus::Started | DeviceWatcherStatus::EnumerationCompleted
            ) {
                info!("Stopping DeviceWatcher...");
                watcher.Stop().map_err(platform)?;
            }
        }
        Ok(())
    }
}

impl Drop for WinRtBleProvider {
    fn drop(&mut self) {
        let _ = self.stop_enumeration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_format_matches_service_names() {
        let guid = GUID::from_u128(0x358407f4_bf93_408a_b128_57515ebaf150);
        assert_eq!(format_guid(&guid), "{358407F4-BF93-408A-B128-57515EBAF150}");
    }

    #[test]
    fn test_watcher_targets_ble_association_endpoints() {
        assert!(BLE_ENDPOINT_FILTER.contains("{bb7bb05e-5972-42b5-94fc-76eaa7084d49}"));
        assert!(WATCHER_PROPERTIES.contains(&"System.Devices.Aep.IsConnected"));

        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = WinRtBleProvider::create_watcher(tx).unwrap();
        assert_eq!(watcher.Status().unwrap(), DeviceWatcherStatus::Created);
    }
}
