//! Connection state machine.
//!
//! [`PrinterClient`] owns at most one session with one device. A session is
//! a transport channel plus two background tasks: a pump that decodes
//! notifications (telemetry and device reports) and a worker that executes
//! print, density and feed commands strictly one at a time.

mod state;
mod worker;


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use image::DynamicImage;
use image_processor::{PackedBitmap, RasterOptions};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use state::PrinterState;
use worker::{Job, PrintTicket, guarded};

use crate::config::PrinterConfig;
use crate::device::{DiscoveredDevice, MacAddress};
use crate::events::{PrintResult, PrinterEvent};
use crate::pairing::{self, PairingAlgorithm, SessionSecret};
use crate::protocol::{CommandFrame, Opcode, PrintJob, commands};
use crate::status::PrinterStatus;
use crate::transport::{Channel, Transport};
use crate::{PrinterError, Result};

/// Maximum number of queued commands per session.
const QUEUE_CAPACITY: usize = 100;
const EVENT_CAPACITY: usize = 256;

type RestoreHook = Box<dyn Fn(&[DiscoveredDevice]) + Send + Sync>;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Session {
    id: u64,
    device_id: String,
    address: MacAddress,
    channel: Channel,
    secret: SessionSecret,
    cancel: CancellationToken,
    queue: mpsc::Sender<Job>,
}

#[derive(Default)]
struct Activity {
    scan: Option<(u64, CancellationToken)>,
    connect: Option<CancellationToken>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: PrinterConfig,
    pairing: Arc<dyn PairingAlgorithm>,
    state: watch::Sender<PrinterState>,
    status: watch::Sender<Option<PrinterStatus>>,
    events: broadcast::Sender<PrinterEvent>,
    session: Mutex<Option<Session>>,
    activity: StdMutex<Activity>,
    known: StdMutex<HashMap<String, DiscoveredDevice>>,
    restore_hook: StdMutex<Option<RestoreHook>>,
    current_print: StdMutex<Option<CancellationToken>>,
    next_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> PrinterState {
        *self.state.borrow()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: PrinterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Move to `to` if the state machine allows it from the current state.
    fn set_state(&self, to: PrinterState) -> bool {
        let mut from = None;
        self.state.send_if_modified(|current| {
            if *current == to || !current.can_transition_to(to) {
                return false;
            }
            from = Some(*current);
            *current = to;
            true
        });
        match from {
            Some(from) => {
                debug!(%from, %to, "State changed");
                self.emit(PrinterEvent::StateChanged { from, to });
                true
            }
            None => {
                let current = self.state();
                if current != to {
                    debug!(%current, %to, "Ignoring illegal state transition");
                }
                current == to
            }
        }
    }

    /// Close the session and return to `Disconnected`. With `only`, nothing
    /// happens unless that session is still the current one.
    async fn teardown(&self, only: Option<u64>) {
        let session = {
            let mut slot = self.session.lock().await;
            if let Some(id) = only {
                if slot.as_ref().map(|s| s.id) != Some(id) {
                    return;
                }
            }
            slot.take()
        };

        if let Some(mut session) = session {
            info!(device = %session.device_id, session = session.id, "Closing session");
            session.cancel.cancel();
            session.secret.clear();
            if let Err(e) = self.transport.close(&session.channel).await {
                warn!(error = %e, "Failed to close channel");
            }
        }
        self.status.send_replace(None);
        self.set_state(PrinterState::Disconnected);
    }

    /// Final connect step. Fails if a disconnect already closed the new
    /// session.
    fn enter_idle(&self) -> Result<()> {
        if self.set_state(PrinterState::Idle) {
            Ok(())
        } else {
            Err(PrinterError::Disconnected)
        }
    }

    fn known_address(&self, device_id: &str) -> Option<MacAddress> {
        lock(&self.known).get(device_id).and_then(|d| d.address)
    }

    async fn establish(self: &Arc<Self>, device_id: &str, cancel: &CancellationToken) -> Result<()> {
        let limit = self.config.link_timeout();
        let channel = guarded(cancel, limit, self.transport.open(device_id)).await?;

        match self.handshake(device_id, &channel, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                cancel.cancel();
                if let Err(close_err) = self.transport.close(&channel).await {
                    warn!(error = %close_err, "Failed to close channel after failed connect");
                }
                Err(e)
            }
        }
    }

    /// Pair over an open channel, wait for the first telemetry snapshot and
    /// install the session.
    async fn handshake(
        self: &Arc<Self>,
        device_id: &str,
        channel: &Channel,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let limit = self.config.link_timeout();

        let address = channel
            .address
            .or_else(|| self.known_address(device_id))
            .ok_or_else(|| {
                PrinterError::InvalidAddress(format!("no hardware address known for {device_id}"))
            })?;
        let nonce = pairing::generate_nonce(self.config.nonce_len);
        let checksums = self.pairing.derive(address.as_bytes(), &nonce)?;
        let auth = commands::auth(&nonce, &checksums)?;
        let secret = SessionSecret::new(nonce, checksums);

        let session_id = self.next_id();
        let notifications = guarded(cancel, limit, self.transport.notifications(channel)).await?;
        let (responses_tx, mut responses) = mpsc::unbounded_channel();
        let mut status_rx = self.status.subscribe();
        self.status.send_replace(None);
        tokio::spawn(worker::pump(
            Arc::clone(self),
            session_id,
            notifications,
            responses_tx,
            cancel.clone(),
        ));

        debug!(device = %device_id, version = self.pairing.version(), "Pairing");
        guarded(cancel, limit, self.transport.write(channel, &auth.encode())).await?;
        let code = guarded(cancel, limit, await_auth_result(&mut responses)).await?;
        if code != 0 {
            return Err(PrinterError::PairingRejected(code));
        }
        self.set_state(PrinterState::Connected);
        info!(device = %device_id, %address, "Paired");

        let query = commands::query_status().encode();
        guarded(cancel, limit, self.transport.write(channel, &query)).await?;
        guarded(cancel, limit, async {
            status_rx
                .wait_for(Option::is_some)
                .await
                .map(|_| ())
                .map_err(|_| PrinterError::Disconnected)
        })
        .await?;

        let (queue, jobs) = mpsc::channel(QUEUE_CAPACITY);
        {
            let mut slot = self.session.lock().await;
            if cancel.is_cancelled() {
                return Err(PrinterError::Disconnected);
            }
            *slot = Some(Session {
                id: session_id,
                device_id: device_id.to_string(),
                address,
                channel: channel.clone(),
                secret,
                cancel: cancel.clone(),
                queue,
            });
        }
        tokio::spawn(worker::run(
            Arc::clone(self),
            session_id,
            channel.clone(),
            jobs,
            responses,
            cancel.clone(),
        ));
        self.enter_idle()
    }
}

async fn await_auth_result(responses: &mut mpsc::UnboundedReceiver<CommandFrame>) -> Result<u8> {
    while let Some(frame) = responses.recv().await {
        if frame.opcode == Opcode::AuthResult {
            return frame
                .payload
                .first()
                .copied()
                .ok_or_else(|| PrinterError::FrameCorrupt("empty AUTH_RESULT".into()));
        }
        debug!(opcode = ?frame.opcode, "Ignoring frame during pairing");
    }
    Err(PrinterError::Disconnected)
}

/// Devices reported by a running scan.
pub struct ScanHandle {
    devices: mpsc::UnboundedReceiver<DiscoveredDevice>,
    cancel: CancellationToken,
}

impl ScanHandle {
    /// Next discovered device, or `None` once the scan has ended.
    pub async fn next(&mut self) -> Option<DiscoveredDevice> {
        self.devices.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the scan to finish and return everything it found.
    pub async fn collect(mut self) -> Vec<DiscoveredDevice> {
        let mut found = Vec::new();
        while let Some(device) = self.next().await {
            found.push(device);
        }
        found
    }
}

/// Client for one thermal printer. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct PrinterClient {
    inner: Arc<Shared>,
}

impl PrinterClient {
    /// Create a client using the pairing algorithm selected by `config`.
    pub fn new(transport: Arc<dyn Transport>, config: PrinterConfig) -> Result<Self> {
        let pairing = pairing::algorithm(config.pairing_version)?;
        Self::with_pairing(transport, config, pairing)
    }

    /// Create a client with a caller-supplied pairing algorithm.
    pub fn with_pairing(
        transport: Arc<dyn Transport>,
        config: PrinterConfig,
        pairing: Arc<dyn PairingAlgorithm>,
    ) -> Result<Self> {
        config.validate()?;
        if config.debug_logging {
            crate::logging::init(true);
        }
        let (state, _) = watch::channel(PrinterState::Disconnected);
        let (status, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Shared {
                transport,
                config,
                pairing,
                state,
                status,
                events,
                session: Mutex::new(None),
                activity: StdMutex::new(Activity::default()),
                known: StdMutex::new(HashMap::new()),
                restore_hook: StdMutex::new(None),
                current_print: StdMutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Create a client on the system Bluetooth LE adapter.
    pub async fn ble(config: PrinterConfig) -> Result<Self> {
        let transport = crate::ble::BleTransport::new(&config).await?;
        Self::new(Arc::new(transport), config)
    }

    pub fn config(&self) -> &PrinterConfig {
        &self.inner.config
    }

    pub fn state(&self) -> PrinterState {
        self.inner.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<PrinterState> {
        self.inner.state.subscribe()
    }

    /// Last valid telemetry snapshot of the current session.
    pub fn status(&self) -> Option<PrinterStatus> {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.inner.events.subscribe()
    }

    /// Printer dot-line width in pixels.
    pub fn dot_width(&self) -> u32 {
        self.inner.config.dot_width
    }

    /// Bytes per packed dot line.
    pub fn data_length(&self) -> usize {
        self.inner.config.data_length()
    }

    /// Hardware address of the connected device.
    pub async fn current_address(&self) -> Option<MacAddress> {
        self.inner.session.lock().await.as_ref().map(|s| s.address)
    }

    /// Start discovering devices. `timeout` defaults to the configured scan
    /// timeout. A scan already running is replaced.
    pub async fn start_scan(&self, timeout: Option<Duration>) -> Result<ScanHandle> {
        if lock(&self.inner.activity).connect.is_some() {
            return Err(PrinterError::Busy("connect in progress"));
        }
        let timeout = timeout.unwrap_or_else(|| self.inner.config.scan_timeout());
        let mut stream = self.inner.transport.scan(timeout).await?;

        let scan_id = self.inner.next_id();
        let cancel = CancellationToken::new();
        {
            let mut activity = lock(&self.inner.activity);
            if activity.connect.is_some() {
                return Err(PrinterError::Busy("connect in progress"));
            }
            if let Some((_, previous)) = activity.scan.replace((scan_id, cancel.clone())) {
                previous.cancel();
            }
        }
        info!(?timeout, "Scanning");

        let (tx, devices) = mpsc::unbounded_channel();
        let shared = Arc::clone(&self.inner);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let device = tokio::select! {
                    _ = token.cancelled() => break,
                    device = stream.next() => match device {
                        Some(device) => device,
                        None => break,
                    },
                };
                debug!(id = %device.id, name = ?device.name, rssi = device.rssi, "Discovered");
                lock(&shared.known).insert(device.id.clone(), device.clone());
                shared.emit(PrinterEvent::DeviceDiscovered(device.clone()));
                let _ = tx.send(device);
            }
            let mut activity = lock(&shared.activity);
            if activity.scan.as_ref().is_some_and(|(id, _)| *id == scan_id) {
                activity.scan = None;
            }
            debug!("Scan finished");
        });

        Ok(ScanHandle { devices, cancel })
    }

    pub fn stop_scan(&self) {
        if let Some((_, token)) = lock(&self.inner.activity).scan.take() {
            token.cancel();
        }
    }

    /// Open a channel to `device_id`, pair and wait for readiness.
    ///
    /// Cancels a running scan. On any failure the client is left
    /// `Disconnected` with the channel closed.
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut activity = lock(&self.inner.activity);
            if activity.connect.is_some() {
                return Err(PrinterError::Busy("connect already in progress"));
            }
            let state = self.state();
            if state != PrinterState::Disconnected {
                return Err(PrinterError::InvalidState {
                    operation: "connect",
                    state,
                });
            }
            if let Some((_, scan)) = activity.scan.take() {
                debug!("Cancelling scan for connect");
                scan.cancel();
            }
            activity.connect = Some(cancel.clone());
        }

        info!(device = %device_id, "Connecting");
        let result = self.inner.establish(device_id, &cancel).await;
        lock(&self.inner.activity).connect = None;

        match &result {
            Ok(()) => info!(device = %device_id, "Printer ready"),
            Err(e) => {
                warn!(device = %device_id, error = %e, "Connect failed");
                self.inner.set_state(PrinterState::Disconnected);
            }
        }
        result
    }

    /// Tear down the session from any state. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(pending) = lock(&self.inner.activity).connect.as_ref() {
            pending.cancel();
        }
        self.inner.teardown(None).await;
    }

    /// Print a packed bitmap. The bitmap must be exactly `dot_width` wide.
    pub async fn print(&self, bitmap: PackedBitmap) -> PrintResult {
        self.submit_print(PrintJob::new(bitmap, self.dot_width())).await
    }

    /// Rasterize `image` with `options` (width forced to the printer's) and
    /// print it.
    pub async fn print_image(&self, image: &DynamicImage, options: &RasterOptions) -> PrintResult {
        let opts = options.clone().with_dot_width(self.dot_width());
        let job = image_processor::rasterize(image, &opts)
            .map_err(PrinterError::from)
            .and_then(|bitmap| PrintJob::new(bitmap, self.dot_width()));
        self.submit_print(job).await
    }

    /// Abort the running print. It resolves with `PrintStopped`.
    pub fn stop_print(&self) -> Result<()> {
        let state = self.state();
        let running = lock(&self.inner.current_print).clone();
        match running {
            Some(token) if state.is_printing() => {
                token.cancel();
                Ok(())
            }
            _ => Err(PrinterError::InvalidState {
                operation: "stop printing",
                state,
            }),
        }
    }

    pub async fn set_density(&self, level: u8) -> Result<()> {
        let frame = commands::set_density(level)?;
        self.submit_command("set density", frame).await
    }

    /// Feed paper by `distance` dot lines.
    pub async fn move_paper(&self, distance: u16) -> Result<()> {
        let frame = commands::feed(distance)?;
        self.submit_command("move paper", frame).await
    }

    /// Ask the device for fresh telemetry; the result arrives as a
    /// `StatusChanged` event when it differs from the last snapshot.
    pub async fn refresh_status(&self) -> Result<()> {
        self.submit_command("query status", commands::query_status())
            .await
    }

    /// Register the callback invoked by [`PrinterClient::restore`].
    pub fn set_restore_hook(&self, hook: impl Fn(&[DiscoveredDevice]) + Send + Sync + 'static) {
        *lock(&self.inner.restore_hook) = Some(Box::new(hook));
    }

    /// Report devices the platform kept connected while the host process
    /// was not running.
    pub async fn restore(&self) -> Result<Vec<DiscoveredDevice>> {
        let devices = self.inner.transport.restored_devices().await?;
        {
            let mut known = lock(&self.inner.known);
            for device in &devices {
                known.insert(device.id.clone(), device.clone());
            }
        }
        if let Some(hook) = lock(&self.inner.restore_hook).as_ref() {
            hook(&devices);
        }
        info!(count = devices.len(), "Restored devices");
        self.inner.emit(PrinterEvent::Restored(devices.clone()));
        Ok(devices)
    }

    /// Queue of the live session, if the current state accepts commands.
    async fn queue(&self, operation: &'static str) -> Result<mpsc::Sender<Job>> {
        let state = self.state();
        if !state.is_ready() {
            return Err(PrinterError::InvalidState { operation, state });
        }
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.queue.clone())
            .ok_or(PrinterError::InvalidState {
                operation,
                state: PrinterState::Disconnected,
            })
    }

    async fn submit_print(&self, job: Result<PrintJob>) -> PrintResult {
        let job_id = self.inner.next_id();
        let (reply, result) = oneshot::channel();
        let ticket = PrintTicket::new(job_id, reply, self.inner.events.clone());

        match job {
            Err(e) => ticket.resolve(Err(e)),
            Ok(job) => match self.queue("print").await {
                Err(e) => ticket.resolve(Err(e)),
                Ok(queue) => {
                    debug!(job_id, "Print job queued");
                    if let Err(e) = queue.try_send(Job::Print { job, ticket }) {
                        reject(e);
                    }
                }
            },
        }

        result.await.unwrap_or(PrintResult {
            job_id,
            outcome: Err(PrinterError::Disconnected),
        })
    }

    async fn submit_command(&self, name: &'static str, frame: CommandFrame) -> Result<()> {
        let queue = self.queue(name).await?;
        let (reply, result) = oneshot::channel();
        if let Err(e) = queue.try_send(Job::Command { name, frame, reply }) {
            reject(e);
        }
        result.await.unwrap_or(Err(PrinterError::Disconnected))
    }
}

fn reject(err: TrySendError<Job>) {
    match err {
        TrySendError::Full(job) => job.fail(PrinterError::Busy("command queue full")),
        TrySendError::Closed(job) => job.fail(PrinterError::Disconnected),
    }
}
