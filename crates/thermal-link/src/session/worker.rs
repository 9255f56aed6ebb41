//! Per-session background tasks: the notification pump and the serial
//! command worker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PrinterState, Shared, lock};
use crate::events::{PrintResult, PrinterEvent};
use crate::protocol::{CommandFrame, FrameReader, Opcode, PrintJob, commands};
use crate::status::StatusDecoder;
use crate::transport::Channel;
use crate::{DeviceFault, PrinterError, Result};

/// Run `fut` under link supervision: session cancellation resolves to
/// `Disconnected`, an elapsed `limit` to `Timeout`.
pub(super) async fn guarded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PrinterError::Disconnected),
        r = tokio::time::timeout(limit, fut) => r.map_err(|_| PrinterError::Timeout(limit))?,
    }
}

/// Delivers the outcome of one print call exactly once: explicitly via
/// [`PrintTicket::resolve`], or as `Disconnected` if dropped unresolved.
pub(super) struct PrintTicket {
    job_id: u64,
    reply: Option<oneshot::Sender<PrintResult>>,
    events: broadcast::Sender<PrinterEvent>,
}

impl PrintTicket {
    pub(super) fn new(
        job_id: u64,
        reply: oneshot::Sender<PrintResult>,
        events: broadcast::Sender<PrinterEvent>,
    ) -> Self {
        Self {
            job_id,
            reply: Some(reply),
            events,
        }
    }

    pub(super) fn resolve(mut self, outcome: Result<()>) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Result<()>) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        let result = PrintResult {
            job_id: self.job_id,
            outcome,
        };
        match &result.outcome {
            Ok(()) => info!(job_id = self.job_id, "Print job completed"),
            Err(e) => error!(job_id = self.job_id, error = %e, "Print job failed"),
        }
        let _ = self.events.send(PrinterEvent::PrintFinished(result.clone()));
        let _ = reply.send(result);
    }
}

impl Drop for PrintTicket {
    fn drop(&mut self) {
        self.complete(Err(PrinterError::Disconnected));
    }
}

pub(super) enum Job {
    Print {
        job: PrintJob,
        ticket: PrintTicket,
    },
    Command {
        name: &'static str,
        frame: CommandFrame,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Self::Print { .. } => "print",
            Self::Command { name, .. } => *name,
        }
    }

    pub(super) fn fail(self, err: PrinterError) {
        match self {
            Self::Print { ticket, .. } => ticket.resolve(Err(err)),
            Self::Command { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Route inbound notifications: telemetry to the status decoder, everything
/// else to the worker. The end of the stream means the link is gone.
pub(super) async fn pump(
    shared: Arc<Shared>,
    session_id: u64,
    mut notifications: BoxStream<'static, Vec<u8>>,
    responses: mpsc::UnboundedSender<CommandFrame>,
    cancel: CancellationToken,
) {
    let reader = FrameReader::new(shared.config.max_frame_payload);
    let mut decoder = StatusDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = notifications.next() => chunk,
        };
        let Some(chunk) = chunk else {
            warn!(session = session_id, "Notification stream ended, link lost");
            cancel.cancel();
            shared.teardown(Some(session_id)).await;
            break;
        };

        for frame in reader.read(&chunk) {
            match frame {
                Ok(frame) if frame.opcode == Opcode::Status => {
                    if let Ok(Some(status)) = decoder.apply(&frame.payload) {
                        debug!(?status, "Status changed");
                        shared.status.send_replace(Some(status));
                        shared.emit(PrinterEvent::StatusChanged(status));
                    }
                }
                Ok(frame) => {
                    let _ = responses.send(frame);
                }
                // Corrupt bytes are logged by the reader and dropped.
                Err(_) => {}
            }
        }
    }
    debug!(session = session_id, "Notification pump stopped");
}

/// Execute queued jobs one at a time, in submission order.
pub(super) async fn run(
    shared: Arc<Shared>,
    session_id: u64,
    channel: Channel,
    mut jobs: mpsc::Receiver<Job>,
    mut responses: mpsc::UnboundedReceiver<CommandFrame>,
    cancel: CancellationToken,
) {
    info!(session = session_id, "Command worker started");
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Reports left over from an earlier job must not complete this one.
        while let Ok(stale) = responses.try_recv() {
            debug!(opcode = ?stale.opcode, "Discarding unsolicited frame");
        }

        let state = shared.state();
        if state != PrinterState::Idle {
            let operation = job.name();
            job.fail(PrinterError::InvalidState { operation, state });
            continue;
        }

        let link_lost = match job {
            Job::Command { name, frame, reply } => {
                debug!(command = name, "Sending command");
                let limit = shared.config.link_timeout();
                let outcome =
                    guarded(&cancel, limit, shared.transport.write(&channel, &frame.encode())).await;
                let lost = outcome.as_ref().is_err_and(PrinterError::is_link_failure);
                if lost {
                    shared.teardown(Some(session_id)).await;
                }
                let _ = reply.send(outcome);
                lost
            }
            Job::Print { job, ticket } => {
                let outcome = execute_print(&shared, &channel, job, &mut responses, &cancel).await;
                let lost = match &outcome {
                    Ok(()) => {
                        shared.set_state(PrinterState::PrintingCompleted);
                        shared.set_state(PrinterState::Idle);
                        false
                    }
                    Err(PrinterError::PrintStopped) => {
                        shared.set_state(PrinterState::Idle);
                        false
                    }
                    Err(e) if e.is_link_failure() => {
                        shared.set_state(PrinterState::Error);
                        shared.teardown(Some(session_id)).await;
                        true
                    }
                    Err(_) => {
                        shared.set_state(PrinterState::Error);
                        shared.set_state(PrinterState::Idle);
                        false
                    }
                };
                ticket.resolve(outcome);
                lost
            }
        };
        if link_lost {
            break;
        }
    }
    info!(session = session_id, "Command worker stopped");
}

async fn execute_print(
    shared: &Shared,
    channel: &Channel,
    job: PrintJob,
    responses: &mut mpsc::UnboundedReceiver<CommandFrame>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (width, height) = (job.width(), job.height());
    let frames = job.into_frames(channel.mtu)?;

    let stop = CancellationToken::new();
    *lock(&shared.current_print) = Some(stop.clone());
    info!(width, height, frames = frames.len(), "Printing");
    shared.set_state(PrinterState::Printing);

    let outcome = stream_print(shared, channel, frames, responses, cancel, &stop).await;
    *lock(&shared.current_print) = None;
    outcome
}

async fn stream_print(
    shared: &Shared,
    channel: &Channel,
    frames: Vec<CommandFrame>,
    responses: &mut mpsc::UnboundedReceiver<CommandFrame>,
    cancel: &CancellationToken,
    stop: &CancellationToken,
) -> Result<()> {
    let limit = shared.config.link_timeout();
    let print_timeout = shared.config.print_timeout();
    let deadline = Instant::now() + print_timeout;

    for frame in frames {
        if stop.is_cancelled() {
            return stop_device(shared, channel, cancel).await;
        }
        guarded(cancel, limit, shared.transport.write(channel, &frame.encode())).await?;
        while let Ok(report) = responses.try_recv() {
            if let Some(done) = handle_report(shared, &report) {
                return done;
            }
        }
    }

    loop {
        let report = tokio::select! {
            _ = cancel.cancelled() => return Err(PrinterError::Disconnected),
            _ = stop.cancelled() => return stop_device(shared, channel, cancel).await,
            _ = tokio::time::sleep_until(deadline) => return Err(PrinterError::Timeout(print_timeout)),
            report = responses.recv() => report.ok_or(PrinterError::Disconnected)?,
        };
        if let Some(done) = handle_report(shared, &report) {
            return done;
        }
    }
}

async fn stop_device(shared: &Shared, channel: &Channel, cancel: &CancellationToken) -> Result<()> {
    info!("Stopping print");
    let limit = shared.config.link_timeout();
    guarded(cancel, limit, shared.transport.write(channel, &commands::stop().encode())).await?;
    Err(PrinterError::PrintStopped)
}

/// Apply a device report received while printing. Returns the job outcome
/// once the device reports completion or a fault.
fn handle_report(shared: &Shared, report: &CommandFrame) -> Option<Result<()>> {
    match report.opcode {
        Opcode::PrintComplete => Some(Ok(())),
        Opcode::PrintFault => {
            let code = report.payload.first().copied().unwrap_or(0);
            Some(Err(PrinterError::DeviceFault(DeviceFault::from_code(code))))
        }
        Opcode::PrintPaused => {
            shared.set_state(PrinterState::PrintingPaused);
            None
        }
        Opcode::PrintResumed => {
            shared.set_state(PrinterState::Printing);
            None
        }
        other => {
            debug!(opcode = ?other, "Ignoring frame while printing");
            None
        }
    }
}
