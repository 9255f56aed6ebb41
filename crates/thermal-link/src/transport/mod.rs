//! Transport contract between the session state machine and a radio stack.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::{DiscoveredDevice, MacAddress};
use crate::Result;

#[cfg(test)]
pub(crate) mod mock;

/// An open link to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub device_id: String,
    /// Largest single write the link accepts.
    pub mtu: usize,
    /// Hardware address, when the platform exposes it.
    pub address: Option<MacAddress>,
}

/// A byte-oriented link to printer peripherals.
///
/// Implementations report failures as `TransportUnavailable`; a notification
/// stream that ends means the link was lost.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Discover devices until `timeout` elapses or the stream is dropped.
    async fn scan(&self, timeout: Duration) -> Result<BoxStream<'static, DiscoveredDevice>>;

    async fn open(&self, device_id: &str) -> Result<Channel>;

    /// Write one buffer of at most `channel.mtu` bytes.
    async fn write(&self, channel: &Channel, bytes: &[u8]) -> Result<()>;

    /// Raw notification payloads from the device.
    async fn notifications(&self, channel: &Channel) -> Result<BoxStream<'static, Vec<u8>>>;

    async fn close(&self, channel: &Channel) -> Result<()>;

    /// Devices the platform kept connected across a host restart.
    async fn restored_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        Ok(Vec::new())
    }
}
