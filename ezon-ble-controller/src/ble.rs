//! BLE transport for EZON trackers
//!
//! Scanning helpers plus [`BleTransport`], the btleplug implementation of
//! [`Transport`].

use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use tokio::task::JoinHandle;

use ezon_proto::ble::{EZON_CHARACTERISTIC_UUID, is_ezon_name};

use crate::error::TransportError;
use crate::session::EventSink;
use crate::transport::{Transport, TransportEvent};

/// How long to scan when the tracker is not known to the adapter yet
pub const DEFAULT_SCAN_TIME: Duration = Duration::from_secs(5);

/// A discovered tracker
#[derive(Debug, Clone)]
pub struct TrackerDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_ezon: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. EZON watches have `is_ezon = true`.
pub async fn scan(
    adapter: &Adapter,
    duration: Duration,
) -> Result<Vec<TrackerDevice>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_ezon = is_ezon_name(&name);

            devices.push(TrackerDevice { name, address, rssi: props.rssi, is_ezon });
        }
    }

    adapter.stop_scan().await?;
    tracing::debug!(found = devices.len(), "scan finished");
    Ok(devices)
}

/// Find a tracker by name/address pattern, or any EZON watch
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
) -> Result<TrackerDevice, TransportError> {
    let devices = scan(adapter, DEFAULT_SCAN_TIME).await?;

    devices
        .into_iter()
        .find(|d| match target {
            Some(t) => d.name.contains(t) || d.address.eq_ignore_ascii_case(t),
            None => d.is_ezon,
        })
        .ok_or_else(|| TransportError::DeviceNotFound(target.unwrap_or("EZON").to_string()))
}

/// Peripheral already known to the adapter
async fn known_peripheral(
    adapter: &Adapter,
    address: &str,
) -> Result<Option<Peripheral>, TransportError> {
    for peripheral in adapter.peripherals().await? {
        if peripheral.address().to_string().eq_ignore_ascii_case(address) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;
type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Forward notifications of the EZON characteristic until the link drops
async fn forward(
    id: PeripheralId,
    mut notifications: Notifications,
    mut central: CentralEvents,
    sink: EventSink,
) {
    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(n) if n.uuid == EZON_CHARACTERISTIC_UUID => {
                    if !sink.emit(TransportEvent::DataAvailable(n.value)) {
                        return;
                    }
                }
                Some(n) => {
                    tracing::debug!(uuid = %n.uuid, "notification from another characteristic")
                }
                None => break,
            },
            event = central.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break,
                Some(_) => {}
                None => break,
            },
        }
    }
    tracing::info!("tracker link dropped");
    sink.emit(TransportEvent::Disconnected);
}

/// btleplug transport bound to one adapter
pub struct BleTransport {
    adapter: Adapter,
    sink: EventSink,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(adapter: Adapter, sink: EventSink) -> Self {
        Self {
            adapter,
            sink,
            peripheral: None,
            characteristic: None,
            forwarder: None,
        }
    }

    async fn locate(&self, address: &str) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = known_peripheral(&self.adapter, address).await? {
            return Ok(peripheral);
        }

        tracing::debug!(address, "tracker not cached, scanning");
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(DEFAULT_SCAN_TIME).await;
        let found = known_peripheral(&self.adapter, address).await;
        self.adapter.stop_scan().await?;

        found?.ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }

    fn stop_forwarder(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }

    fn link(&self) -> Result<(&Peripheral, &Characteristic), TransportError> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = self
            .characteristic
            .as_ref()
            .ok_or(TransportError::CharacteristicNotFound)?;
        Ok((peripheral, characteristic))
    }
}

impl Transport for BleTransport {
    async fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.stop_forwarder();
        let peripheral = self.locate(address).await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        // kept from here on so disconnect can tear down a half finished setup
        self.peripheral = Some(peripheral.clone());

        peripheral.discover_services().await?;
        let characteristics = peripheral.characteristics();
        let uuids: Vec<_> = characteristics.iter().map(|c| c.uuid).collect();
        self.characteristic = characteristics
            .into_iter()
            .find(|c| c.uuid == EZON_CHARACTERISTIC_UUID);
        let notifications = peripheral.notifications().await?;
        let central = self.adapter.events().await?;

        // the session only hears about the link once nothing above can fail
        tracing::info!(address, "connected");
        self.sink.emit(TransportEvent::Connected);
        self.sink.emit(TransportEvent::ServicesDiscovered(uuids));
        self.forwarder = Some(tokio::spawn(forward(
            peripheral.id(),
            notifications,
            central,
            self.sink.clone(),
        )));
        Ok(true)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_forwarder();
        self.characteristic = None;
        let result = match self.peripheral.take() {
            Some(peripheral) => peripheral.disconnect().await,
            None => Ok(()),
        };
        // the link is unusable even when the radio reports an error
        self.sink.emit(TransportEvent::Disconnected);
        result.map_err(TransportError::from)
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.link()?;
        peripheral.write(characteristic, payload, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn enable_notifications(&mut self) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.link()?;
        peripheral.subscribe(characteristic).await?;
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}
