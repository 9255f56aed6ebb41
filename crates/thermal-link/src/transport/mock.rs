//! Scripted in-memory transport for tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Channel, Transport};
use crate::device::{DiscoveredDevice, MacAddress};
use crate::protocol::{CommandFrame, Opcode};
use crate::{PrinterError, Result};

/// How the device answers `PRINT_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintReply {
    Complete,
    Fault(u8),
    /// Report `PRINT_PAUSED`, then `PRINT_RESUMED`, then completion.
    PauseThenComplete,
    Silent,
}

#[derive(Debug, Clone)]
pub struct Script {
    /// `AUTH_RESULT` code; `None` never answers.
    pub auth_result: Option<u8>,
    /// `STATUS` payload sent in reply to `QUERY_STATUS`.
    pub status: Option<Vec<u8>>,
    pub print_reply: PrintReply,
    /// Drop the link as soon as a `PRINT_BEGIN` arrives.
    pub lose_link_on_print: bool,
    pub open_delay: Option<Duration>,
    pub address: Option<MacAddress>,
    pub mtu: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            auth_result: Some(0),
            status: Some(vec![80, 0b001, 0, 3]),
            print_reply: PrintReply::Complete,
            lose_link_on_print: false,
            open_delay: None,
            address: Some(MacAddress::new([0xdc, 0x0d, 0x30, 0x01, 0x02, 0x03])),
            mtu: 182,
        }
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<DiscoveredDevice>,
    restored: Vec<DiscoveredDevice>,
    writes: Vec<Vec<u8>>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
    opened: usize,
    closed: usize,
}

#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    state: Arc<Mutex<MockState>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_devices(self, devices: Vec<DiscoveredDevice>) -> Self {
        lock(&self.state).devices = devices;
        self
    }

    pub fn with_restored(self, devices: Vec<DiscoveredDevice>) -> Self {
        lock(&self.state).restored = devices;
        self
    }

    pub fn update_script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut lock(&self.script));
    }

    /// Every buffer written so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    /// Opcodes of every written frame, in order.
    pub fn written_opcodes(&self) -> Vec<Opcode> {
        self.writes()
            .iter()
            .filter_map(|w| w.first().copied().and_then(Opcode::from_byte))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closed
    }

    /// Deliver a raw notification to the open channel.
    pub fn notify(&self, bytes: Vec<u8>) {
        if let Some(tx) = &lock(&self.state).notify {
            let _ = tx.send(bytes);
        }
    }

    pub fn notify_frame(&self, opcode: Opcode, payload: Vec<u8>) {
        self.notify(CommandFrame { opcode, payload }.encode());
    }

    /// End the notification stream, as a dropped radio link would.
    pub fn lose_link(&self) {
        lock(&self.state).notify = None;
    }

    fn respond(&self, frame: &CommandFrame) {
        let script = lock(&self.script).clone();
        match frame.opcode {
            Opcode::Auth => {
                if let Some(code) = script.auth_result {
                    self.notify_frame(Opcode::AuthResult, vec![code]);
                }
            }
            Opcode::QueryStatus => {
                if let Some(status) = script.status {
                    self.notify_frame(Opcode::Status, status);
                }
            }
            Opcode::PrintBegin if script.lose_link_on_print => self.lose_link(),
            Opcode::PrintEnd => match script.print_reply {
                PrintReply::Complete => self.notify_frame(Opcode::PrintComplete, vec![]),
                PrintReply::Fault(code) => self.notify_frame(Opcode::PrintFault, vec![code]),
                PrintReply::PauseThenComplete => {
                    self.notify_frame(Opcode::PrintPaused, vec![]);
                    self.notify_frame(Opcode::PrintResumed, vec![]);
                    self.notify_frame(Opcode::PrintComplete, vec![]);
                }
                PrintReply::Silent => {}
            },
            _ => {}
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(&self, timeout: Duration) -> Result<BoxStream<'static, DiscoveredDevice>> {
        let devices = lock(&self.state).devices.clone();
        let hold = futures::stream::once(tokio::time::sleep(timeout)).filter_map(|_| async { None::<DiscoveredDevice> });
        Ok(futures::stream::iter(devices).chain(hold).boxed())
    }

    async fn open(&self, device_id: &str) -> Result<Channel> {
        let script = lock(&self.script).clone();
        if let Some(delay) = script.open_delay {
            tokio::time::sleep(delay).await;
        }
        let known = lock(&self.state).devices.iter().any(|d| d.id == device_id);
        if !known {
            return Err(PrinterError::TransportUnavailable(format!(
                "unknown device {device_id}"
            )));
        }
        lock(&self.state).opened += 1;
        Ok(Channel {
            device_id: device_id.to_string(),
            mtu: script.mtu,
            address: script.address,
        })
    }

    async fn write(&self, channel: &Channel, bytes: &[u8]) -> Result<()> {
        if bytes.len() > channel.mtu {
            return Err(PrinterError::TransportUnavailable(format!(
                "write of {} bytes exceeds mtu {}",
                bytes.len(),
                channel.mtu
            )));
        }
        {
            let mut state = lock(&self.state);
            if state.notify.is_none() {
                return Err(PrinterError::TransportUnavailable("link lost".into()));
            }
            state.writes.push(bytes.to_vec());
        }
        if let Ok(frame) = CommandFrame::decode(bytes) {
            self.respond(&frame);
        }
        Ok(())
    }

    async fn notifications(&self, _channel: &Channel) -> Result<BoxStream<'static, Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).notify = Some(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self, _channel: &Channel) -> Result<()> {
        let mut state = lock(&self.state);
        state.notify = None;
        state.closed += 1;
        Ok(())
    }

    async fn restored_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        Ok(lock(&self.state).restored.clone())
    }
}

/// A device entry matching the default script.
pub fn printer_device(id: &str) -> DiscoveredDevice {
    DiscoveredDevice::new(id, Some("TL-P1".into()), Script::default().address, -55)
}
