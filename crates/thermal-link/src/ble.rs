//! Bluetooth LE transport using btleplug.
//!
//! Discovers peripherals advertising the printer service, connects, finds
//! the write and notify characteristics and exposes them through the
//! [`Transport`] contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::PrinterConfig;
use crate::device::{DiscoveredDevice, MacAddress};
use crate::transport::{Channel, Transport};
use crate::{PrinterError, Result};

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ae30_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000_ae01_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000_ae02_0000_1000_8000_00805f9b34fb);

/// Adapter initialization can fail transiently right after process start
/// on some platforms.
const INIT_RETRY_COUNT: usize = 6;
const INIT_RETRY_DELAY: Duration = Duration::from_millis(500);

const SCAN_CHANNEL_CAPACITY: usize = 32;

fn unavailable(e: impl std::fmt::Display) -> PrinterError {
    PrinterError::TransportUnavailable(e.to_string())
}

struct Link {
    peripheral: Peripheral,
    write_char: Characteristic,
}

/// btleplug-backed transport on the first available adapter.
pub struct BleTransport {
    adapter: Adapter,
    mtu: usize,
    write_interval: Duration,
    links: Mutex<HashMap<String, Link>>,
}

impl BleTransport {
    pub async fn new(config: &PrinterConfig) -> Result<Self> {
        let mut last_err = None;
        for attempt in 1..=INIT_RETRY_COUNT {
            match first_adapter().await {
                Ok(adapter) => {
                    return Ok(Self {
                        adapter,
                        mtu: config.mtu,
                        write_interval: config.write_interval(),
                        links: Mutex::new(HashMap::new()),
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "BLE adapter initialization failed");
                    last_err = Some(e);
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| unavailable("No BLE adapter found")))
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await
            .map_err(unavailable)?
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| unavailable(format!("device {device_id} not found; scan first")))
    }

    async fn peripheral_for(&self, channel: &Channel) -> Result<(Peripheral, Characteristic)> {
        let links = self.links.lock().await;
        let link = links.get(&channel.device_id).ok_or(PrinterError::Disconnected)?;
        Ok((link.peripheral.clone(), link.write_char.clone()))
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(unavailable)?;
    manager
        .adapters()
        .await
        .map_err(unavailable)?
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("No BLE adapter found"))
}

/// Platforms that hide hardware addresses report all zeros.
fn address_of(addr: btleplug::api::BDAddr) -> Option<MacAddress> {
    Some(MacAddress::new(addr.into_inner())).filter(|a| !a.is_unspecified())
}

async fn describe(peripheral: &Peripheral) -> Option<DiscoveredDevice> {
    let props = peripheral.properties().await.ok().flatten()?;
    Some(DiscoveredDevice {
        id: peripheral.id().to_string(),
        name: props.local_name,
        address: address_of(props.address),
        rssi: props.rssi.unwrap_or(i16::MIN),
    })
}

async fn run_scan(
    adapter: Adapter,
    timeout: Duration,
    tx: mpsc::Sender<DiscoveredDevice>,
) -> Result<()> {
    let mut events = adapter.events().await.map_err(unavailable)?;
    adapter
        .start_scan(ScanFilter {
            services: vec![SERVICE_UUID],
        })
        .await
        .map_err(unavailable)?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut seen = std::collections::HashSet::new();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tx.closed() => break,
            event = events.next() => {
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id)) => id,
                    Some(_) => continue,
                    None => break,
                };
                if seen.contains(&id) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else { continue };
                let advertises = matches!(
                    peripheral.properties().await,
                    Ok(Some(ref props)) if props.services.contains(&SERVICE_UUID)
                );
                if !advertises {
                    continue;
                }
                if let Some(device) = describe(&peripheral).await {
                    tracing::info!(name = ?device.name, id = %device.id, "Found printer");
                    seen.insert(id);
                    if tx.send(device).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    adapter.stop_scan().await.map_err(unavailable)?;
    tracing::info!(count = seen.len(), "BLE scan complete");
    Ok(())
}

async fn wait_disconnected(adapter: Adapter, id: PeripheralId) {
    let Ok(mut events) = adapter.events().await else {
        return std::future::pending().await;
    };
    while let Some(event) = events.next().await {
        if matches!(event, CentralEvent::DeviceDisconnected(ref gone) if *gone == id) {
            return;
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(&self, timeout: Duration) -> Result<BoxStream<'static, DiscoveredDevice>> {
        tracing::info!(?timeout, "Starting BLE scan");
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = run_scan(adapter, timeout, tx).await {
                tracing::error!(error = %e, "BLE scan failed");
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn open(&self, device_id: &str) -> Result<Channel> {
        let peripheral = self.find_peripheral(device_id).await?;
        tracing::info!(id = %device_id, "Connecting to device");

        peripheral.connect().await.map_err(unavailable)?;
        peripheral.discover_services().await.map_err(unavailable)?;

        let chars = peripheral.characteristics();
        let find = |uuid: Uuid| {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| unavailable(format!("characteristic {uuid} missing")))
        };
        let write_char = find(WRITE_CHARACTERISTIC)?;
        let notify_char = find(NOTIFY_CHARACTERISTIC)?;
        peripheral.subscribe(&notify_char).await.map_err(unavailable)?;

        let address = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| address_of(p.address));

        self.links.lock().await.insert(
            device_id.to_string(),
            Link {
                peripheral,
                write_char,
            },
        );
        // btleplug does not expose the negotiated ATT MTU.
        tracing::info!(mtu = self.mtu, "Connected and discovered characteristics");
        Ok(Channel {
            device_id: device_id.to_string(),
            mtu: self.mtu,
            address,
        })
    }

    async fn write(&self, channel: &Channel, bytes: &[u8]) -> Result<()> {
        let (peripheral, write_char) = self.peripheral_for(channel).await?;
        peripheral
            .write(&write_char, bytes, WriteType::WithoutResponse)
            .await
            .map_err(|e| unavailable(format!("write of {} bytes: {e}", bytes.len())))?;
        tokio::time::sleep(self.write_interval).await;
        Ok(())
    }

    async fn notifications(&self, channel: &Channel) -> Result<BoxStream<'static, Vec<u8>>> {
        let (peripheral, _) = self.peripheral_for(channel).await?;
        let stream = peripheral.notifications().await.map_err(unavailable)?;
        let gone = wait_disconnected(self.adapter.clone(), peripheral.id());
        Ok(stream
            .filter_map(|n| async move { (n.uuid == NOTIFY_CHARACTERISTIC).then_some(n.value) })
            .take_until(Box::pin(gone))
            .boxed())
    }

    async fn close(&self, channel: &Channel) -> Result<()> {
        let Some(link) = self.links.lock().await.remove(&channel.device_id) else {
            return Ok(());
        };
        tracing::info!(id = %channel.device_id, "Disconnecting BLE device");
        link.peripheral.disconnect().await.map_err(unavailable)
    }

    async fn restored_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut restored = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(unavailable)? {
            if peripheral.is_connected().await.unwrap_or(false) {
                if let Some(device) = describe(&peripheral).await {
                    restored.push(device);
                }
            }
        }
        Ok(restored)
    }
}
