use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::endpoint::{EndpointPair, SinkStream, SourceStream};
use crate::error::{HookError, RelayError};
use crate::hooks::{Acceptance, RelayHooks};

const SCRATCH_SIZE: usize = 100 * 1024;

/// Read deadlines for one pump. The idle window applies while the
/// reassembly buffer is empty, so a quiet connection is left alone; the
/// stalled window applies once a partial unit is buffered, so an
/// unresponsive framing cycle cannot hang the pump forever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PumpTimeouts {
    pub idle: Duration,
    pub stalled: Duration,
}

impl Default for PumpTimeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(24 * 60 * 60),
            stalled: Duration::from_secs(30),
        }
    }
}

/// How a pump's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source reached end of stream or the peer disconnected.
    SourceExhausted,
    /// A stop operation was requested through the handle.
    Stopped,
    /// No bytes arrived within the active read window.
    ReadTimeout,
    /// A hook invocation failed.
    HookFailed,
    /// An unexpected read or write failure.
    IoFailed,
    /// The pump was started without a source.
    NoSource,
}

#[derive(Debug, Clone)]
pub struct PumpSummary {
    pub id: Uuid,
    pub reason: StopReason,
    pub bytes_forwarded: u64,
    pub chunks_forwarded: u64,
}

struct Control {
    running: AtomicBool,
    close_on_stop: AtomicBool,
    hooks_enabled: AtomicBool,
    stop: Notify,
}

enum PumpCommand {
    SetSource(Option<SourceStream>),
    SetSink(Option<SinkStream>),
    SetEndpoints(Option<SourceStream>, Option<SinkStream>),
    Send {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    SendRaw {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    RegisterHooks {
        hooks: Box<dyn RelayHooks>,
        reply: oneshot::Sender<bool>,
    },
}

enum Step {
    Interrupted,
    Command(PumpCommand),
    TimedOut,
    Read(io::Result<usize>),
}

/// One-directional relay engine: reads from its source, accumulates bytes
/// until the hook set accepts a complete unit, lets the hooks rewrite the
/// unit, and writes the result to its sink. Built once, started once, not
/// restartable.
pub struct Pump {
    id: Uuid,
    source: Option<SourceStream>,
    sink: Option<SinkStream>,
    hooks: Option<Box<dyn RelayHooks>>,
    timeouts: PumpTimeouts,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
    control: Arc<Control>,
    commands_tx: mpsc::UnboundedSender<PumpCommand>,
    commands: mpsc::UnboundedReceiver<PumpCommand>,
    parked: Arc<Mutex<Option<EndpointPair>>>,
    bytes_forwarded: u64,
    chunks_forwarded: u64,
}

impl Pump {
    pub fn new(source: Option<SourceStream>, sink: Option<SinkStream>) -> Self {
        Self::with_timeouts(source, sink, PumpTimeouts::default())
    }

    pub fn with_timeouts(
        source: Option<SourceStream>,
        sink: Option<SinkStream>,
        timeouts: PumpTimeouts,
    ) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            source,
            sink,
            hooks: None,
            timeouts,
            buffer: Vec::new(),
            scratch: vec![0u8; SCRATCH_SIZE],
            control: Arc::new(Control {
                running: AtomicBool::new(true),
                close_on_stop: AtomicBool::new(true),
                hooks_enabled: AtomicBool::new(true),
                stop: Notify::new(),
            }),
            commands_tx,
            commands,
            parked: Arc::new(Mutex::new(None)),
            bytes_forwarded: 0,
            chunks_forwarded: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Install the hook set before the pump starts. At most one hook set is
    /// ever effective; a second registration is rejected.
    pub fn register_hooks(&mut self, hooks: Box<dyn RelayHooks>) -> bool {
        if self.hooks.is_some() {
            return false;
        }
        self.hooks = Some(hooks);
        true
    }

    /// Spawn the relay loop on its own task and return the lifecycle handle.
    /// Never blocks the caller.
    pub fn start(self) -> PumpHandle {
        let id = self.id;
        let control = Arc::clone(&self.control);
        let commands = self.commands_tx.clone();
        let parked = Arc::clone(&self.parked);
        let task = tokio::spawn(self.run());
        PumpHandle {
            id,
            control,
            commands,
            parked,
            task,
        }
    }

    async fn run(mut self) -> PumpSummary {
        if self.source.is_none() {
            // Nothing to relay. Hand the sink back untouched: no hook runs
            // and nothing is closed on this path.
            self.control.running.store(false, Ordering::SeqCst);
            debug!(pump = %self.id, "started without a source");
            let sink = self.sink.take();
            *lock_parked(&self.parked) = Some(EndpointPair { source: None, sink });
            return self.summary(StopReason::NoSource);
        }
        let reason = self.pump_loop().await;
        self.shutdown(reason).await
    }

    async fn pump_loop(&mut self) -> StopReason {
        loop {
            if !self.control.running.load(Ordering::SeqCst) {
                return StopReason::Stopped;
            }
            let window = if self.buffer.is_empty() {
                self.timeouts.idle
            } else {
                self.timeouts.stalled
            };

            let step = {
                let source = self.source.as_mut();
                let scratch = self.scratch.as_mut_slice();
                tokio::select! {
                    biased;
                    _ = self.control.stop.notified() => Step::Interrupted,
                    Some(command) = self.commands.recv() => Step::Command(command),
                    read = timeout(window, read_step(source, scratch)) => match read {
                        Ok(result) => Step::Read(result),
                        Err(_) => Step::TimedOut,
                    },
                }
            };

            match step {
                Step::Interrupted => continue,
                Step::Command(command) => self.apply(command).await,
                Step::TimedOut => {
                    warn!(
                        pump = %self.id,
                        buffered = self.buffer.len(),
                        content = %String::from_utf8_lossy(&self.buffer),
                        "read window elapsed, terminating"
                    );
                    return StopReason::ReadTimeout;
                }
                Step::Read(Ok(0)) => {
                    debug!(pump = %self.id, "source reached end of stream");
                    return StopReason::SourceExhausted;
                }
                Step::Read(Ok(n)) => {
                    self.buffer.extend_from_slice(&self.scratch[..n]);
                    if let Err(err) = self.drain_buffer().await {
                        return match err {
                            RelayError::Hook(err) => {
                                error!(
                                    pump = %self.id,
                                    error = %err,
                                    buffered = self.buffer.len(),
                                    "hook failure, terminating"
                                );
                                StopReason::HookFailed
                            }
                            err => {
                                error!(pump = %self.id, error = %err, "relay failure, terminating");
                                StopReason::IoFailed
                            }
                        };
                    }
                }
                Step::Read(Err(err)) if expected_disconnect(&err) => {
                    debug!(pump = %self.id, error = %err, "peer disconnected during read");
                    return StopReason::SourceExhausted;
                }
                Step::Read(Err(err)) => {
                    error!(pump = %self.id, error = %err, "read failed, terminating");
                    return StopReason::IoFailed;
                }
            }
        }
    }

    /// Accept-and-forward cycle: repeatedly ask the hook set how many
    /// leading bytes form a complete unit, then transform and forward that
    /// prefix. Stops when the hooks report an incomplete unit; the
    /// unaccepted remainder stays buffered for the next read.
    async fn drain_buffer(&mut self) -> Result<(), RelayError> {
        while !self.buffer.is_empty() {
            let accepted = match self.accept_decision()? {
                Acceptance::Accept(len) if len > 0 && len <= self.buffer.len() => len,
                _ => break,
            };
            let unit: Vec<u8> = self.buffer.drain(..accepted).collect();
            let unit = self.transform_received(unit)?;
            self.send_chunk(unit).await?;
        }
        Ok(())
    }

    fn accept_decision(&mut self) -> Result<Acceptance, HookError> {
        if !self.control.hooks_enabled.load(Ordering::SeqCst) {
            return Ok(Acceptance::Accept(self.buffer.len()));
        }
        match self.hooks.as_mut() {
            Some(hooks) => hooks.on_packet_received(&self.buffer),
            None => Ok(Acceptance::Accept(self.buffer.len())),
        }
    }

    fn transform_received(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>, HookError> {
        if !self.control.hooks_enabled.load(Ordering::SeqCst) {
            return Ok(chunk);
        }
        match self.hooks.as_mut() {
            Some(hooks) => hooks.on_chunk_received(chunk),
            None => Ok(chunk),
        }
    }

    fn transform_send(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>, HookError> {
        if !self.control.hooks_enabled.load(Ordering::SeqCst) {
            return Ok(chunk);
        }
        match self.hooks.as_mut() {
            Some(hooks) => hooks.on_chunk_send(chunk),
            None => Ok(chunk),
        }
    }

    async fn send_chunk(&mut self, chunk: Vec<u8>) -> Result<(), RelayError> {
        let chunk = self.transform_send(chunk)?;
        self.write_out(chunk).await
    }

    async fn write_out(&mut self, chunk: Vec<u8>) -> Result<(), RelayError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.write_all(&chunk).await?;
        sink.flush().await?;
        self.bytes_forwarded += chunk.len() as u64;
        self.chunks_forwarded += 1;
        Ok(())
    }

    async fn apply(&mut self, command: PumpCommand) {
        match command {
            PumpCommand::SetSource(source) => self.source = source,
            PumpCommand::SetSink(sink) => self.sink = sink,
            PumpCommand::SetEndpoints(source, sink) => {
                self.source = source;
                self.sink = sink;
            }
            PumpCommand::Send { data, reply } => {
                let _ = reply.send(self.send_chunk(data).await);
            }
            PumpCommand::SendRaw { data, reply } => {
                let _ = reply.send(self.write_out(data).await);
            }
            PumpCommand::RegisterHooks { hooks, reply } => {
                let accepted = self.hooks.is_none();
                if accepted {
                    self.hooks = Some(hooks);
                }
                let _ = reply.send(accepted);
            }
        }
    }

    /// Runs exactly once, on every exit path of a started loop.
    async fn shutdown(mut self, reason: StopReason) -> PumpSummary {
        self.control.running.store(false, Ordering::SeqCst);
        if self.control.close_on_stop.load(Ordering::SeqCst) {
            // Close the two endpoints independently. The source closes on
            // drop; a sink shutdown failure is logged, never propagated.
            drop(self.source.take());
            if let Some(mut sink) = self.sink.take() {
                if let Err(err) = sink.shutdown().await {
                    debug!(pump = %self.id, error = %err, "sink close failed");
                }
            }
        } else {
            // Ownership of the endpoints transfers elsewhere; park them for
            // retrieval through the handle.
            *lock_parked(&self.parked) = Some(EndpointPair {
                source: self.source.take(),
                sink: self.sink.take(),
            });
        }
        debug!(
            pump = %self.id,
            ?reason,
            bytes = self.bytes_forwarded,
            chunks = self.chunks_forwarded,
            "pump finished"
        );
        self.summary(reason)
    }

    fn summary(&self, reason: StopReason) -> PumpSummary {
        PumpSummary {
            id: self.id,
            reason,
            bytes_forwarded: self.bytes_forwarded,
            chunks_forwarded: self.chunks_forwarded,
        }
    }
}

async fn read_step(source: Option<&mut SourceStream>, scratch: &mut [u8]) -> io::Result<usize> {
    match source {
        Some(source) => source.read(scratch).await,
        // No source to read from; wait for a swap or a stop request.
        None => std::future::pending::<io::Result<usize>>().await,
    }
}

fn expected_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

fn lock_parked(
    parked: &Mutex<Option<EndpointPair>>,
) -> std::sync::MutexGuard<'_, Option<EndpointPair>> {
    parked.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Lifecycle handle to a started pump. Stop operations are callable from
/// any task and only set flags or wake the loop; everything that touches
/// the endpoints or the hook set is serialized through the loop itself.
pub struct PumpHandle {
    id: Uuid,
    control: Arc<Control>,
    commands: mpsc::UnboundedSender<PumpCommand>,
    parked: Arc<Mutex<Option<EndpointPair>>>,
    task: JoinHandle<PumpSummary>,
}

impl PumpHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    /// Urgent abort: stop the loop, wake any in-flight read promptly, and
    /// close both endpoints during cleanup.
    pub fn force_close(&self) {
        self.control.close_on_stop.store(true, Ordering::SeqCst);
        self.control.running.store(false, Ordering::SeqCst);
        self.control.stop.notify_one();
    }

    /// Stop the loop but leave both endpoints open; retrieve them with
    /// [`take_endpoints`](Self::take_endpoints) after [`join`](Self::join).
    pub fn finish_without_close(&self) {
        self.control.close_on_stop.store(false, Ordering::SeqCst);
        self.control.running.store(false, Ordering::SeqCst);
        self.control.stop.notify_one();
    }

    /// Graceful shutdown: stop the loop and close both endpoints during
    /// cleanup.
    pub fn close(&self) {
        self.control.close_on_stop.store(true, Ordering::SeqCst);
        self.control.running.store(false, Ordering::SeqCst);
        self.control.stop.notify_one();
    }

    pub fn set_source(&self, source: Option<SourceStream>) -> Result<(), RelayError> {
        self.command(PumpCommand::SetSource(source))
    }

    pub fn set_sink(&self, sink: Option<SinkStream>) -> Result<(), RelayError> {
        self.command(PumpCommand::SetSink(sink))
    }

    pub fn set_endpoints(
        &self,
        source: Option<SourceStream>,
        sink: Option<SinkStream>,
    ) -> Result<(), RelayError> {
        self.command(PumpCommand::SetEndpoints(source, sink))
    }

    /// Run `data` through the send-side hook and write it to the sink.
    /// Hook and write failures come back to the caller; the loop stays up.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), RelayError> {
        let (reply, result) = oneshot::channel();
        self.command(PumpCommand::Send { data, reply })?;
        result.await.map_err(|_| RelayError::NotRunning)?
    }

    /// Write `data` to the sink directly, bypassing the send-side hook.
    /// For injected traffic that must not be re-recorded.
    pub async fn send_without_recording(&self, data: Vec<u8>) -> Result<(), RelayError> {
        let (reply, result) = oneshot::channel();
        self.command(PumpCommand::SendRaw { data, reply })?;
        result.await.map_err(|_| RelayError::NotRunning)?
    }

    /// Install a hook set at runtime. First registration wins; returns
    /// `false` if a hook set is already installed.
    pub async fn register_hooks(&self, hooks: Box<dyn RelayHooks>) -> Result<bool, RelayError> {
        let (reply, result) = oneshot::channel();
        self.command(PumpCommand::RegisterHooks { hooks, reply })?;
        result.await.map_err(|_| RelayError::NotRunning)
    }

    pub fn enable_hooks(&self) {
        self.control.hooks_enabled.store(true, Ordering::SeqCst);
    }

    /// While disabled, dispatch is identity and the whole buffer counts as
    /// one accepted unit.
    pub fn disable_hooks(&self) {
        self.control.hooks_enabled.store(false, Ordering::SeqCst);
    }

    pub fn hooks_enabled(&self) -> bool {
        self.control.hooks_enabled.load(Ordering::SeqCst)
    }

    /// Wait for the loop to finish. The loop never propagates its failures;
    /// the summary reports how it ended.
    pub async fn join(&mut self) -> Result<PumpSummary, RelayError> {
        (&mut self.task)
            .await
            .map_err(|err| RelayError::Task(err.to_string()))
    }

    /// Endpoints parked by an exit with `finish_without_close` (or a
    /// sourceless start). Empty until the loop has finished.
    pub fn take_endpoints(&self) -> Option<EndpointPair> {
        lock_parked(&self.parked).take()
    }

    fn command(&self, command: PumpCommand) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::NotRunning)
    }
}
