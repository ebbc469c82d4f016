//! Session: one tracker, one sequential event loop
//!
//! Transport events and user commands come from different tasks. Both are
//! queued on one channel and [`Session::run`] handles them one at a time, so
//! the reassembler and connection state have a single writer.

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use ezon_proto::ble::{self, EZON_CHARACTERISTIC_UUID};
use ezon_proto::{
    Command, FrameKind, MINUTES_PER_DAY, ProtocolAnomaly, Reassembler, ReassemblyEvent,
    StepSeries, StepSummary, classify, hex_dump, text_lossy,
};

use crate::error::{Error, Result};
use crate::settings::SettingsStore;
use crate::transport::{Transport, TransportEvent};

/// Link state, changed by transport events (and by our own connect request)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ServicesReady,
}

impl ConnectionState {
    /// Writes go straight through in these states
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::ServicesReady)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ServicesReady => "services ready",
        };
        f.write_str(s)
    }
}

/// What observers get told
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    ConnectionChanged(ConnectionState),
    /// Every characteristic the tracker exposes, with its known name
    Characteristics(Vec<(Uuid, &'static str)>),
    CharacteristicFound,
    /// A frame that is not part of a step transfer
    Data { text: String, hex: String },
    TransferStarted,
    TransferProgress { bytes_so_far: usize, expected: usize },
    StepsReady { series: StepSeries, summary: StepSummary },
    Anomaly(ProtocolAnomaly),
    /// Drop whatever was displayed for the previous connection
    Cleared,
    OperationFailed { operation: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Opaque transport address of the tracker
    pub address: String,
    /// Send `ConnectProbe` every time the link comes up
    pub probe_on_connect: bool,
    /// Upper bound shown with transfer progress
    pub expected_minutes: usize,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            probe_on_connect: false,
            expected_minutes: MINUTES_PER_DAY,
        }
    }
}

/// Work items for [`Session::run`]
#[derive(Debug)]
pub enum SessionInput {
    Event(TransportEvent),
    Command(Command, oneshot::Sender<Result<()>>),
    Connect(oneshot::Sender<Result<bool>>),
    Disconnect(oneshot::Sender<Result<()>>),
}

pub type SessionInbox = mpsc::UnboundedReceiver<SessionInput>;

/// Create the session queue
pub fn channel() -> (SessionHandle, SessionInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SessionHandle { tx }, rx)
}

/// Caller side of the session queue. The loop stops once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    /// Encode, connect if needed and write `command`
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionInput::Command(command, reply))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn connect(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionInput::Connect(reply))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionInput::Disconnect(reply))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Sink for a transport. It does not keep the session alive.
    pub fn event_sink(&self) -> EventSink {
        EventSink { tx: self.tx.downgrade() }
    }
}

/// Where a transport delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::WeakUnboundedSender<SessionInput>,
}

impl EventSink {
    /// Queue an event; false once the session is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(SessionInput::Event(event)).is_ok(),
            None => false,
        }
    }
}

/// Protocol engine for one tracker
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    target: u32,
    state: ConnectionState,
    reassembler: Reassembler,
    observers: Vec<mpsc::UnboundedSender<SessionNotice>>,
}

impl<T: Transport> Session<T> {
    /// The step target is read from `settings` once, here, so the event loop
    /// never touches the store.
    pub fn new(transport: T, config: SessionConfig, settings: &dyn SettingsStore) -> Self {
        Self {
            transport,
            config,
            target: settings.read_target(),
            state: ConnectionState::Disconnected,
            reassembler: Reassembler::new(),
            observers: Vec::new(),
        }
    }

    /// Register an observer
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Daily target used for step summaries
    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Process queued work until every [`SessionHandle`] is dropped
    pub async fn run(mut self, mut inbox: SessionInbox) {
        while let Some(input) = inbox.recv().await {
            match input {
                SessionInput::Event(event) => self.handle_event(event).await,
                SessionInput::Command(command, reply) => {
                    let _ = reply.send(self.send(command).await);
                }
                SessionInput::Connect(reply) => {
                    let _ = reply.send(self.connect().await);
                }
                SessionInput::Disconnect(reply) => {
                    let _ = reply.send(self.disconnect().await);
                }
            }
        }
        tracing::debug!(address = %self.config.address, "session closed");
    }

    /// Ask the transport to connect; the link is up once `Connected` arrives
    pub async fn connect(&mut self) -> Result<bool> {
        self.set_state(ConnectionState::Connecting);
        match self.transport.connect(&self.config.address).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(address = %self.config.address, "connect request rejected");
                self.set_state(ConnectionState::Disconnected);
                Ok(false)
            }
            Err(e) => {
                tracing::error!(address = %self.config.address, error = %e, "connect failed");
                // a half open link may already have queued Connected; the
                // Disconnected this produces lands after it
                if let Err(rollback) = self.transport.disconnect().await {
                    tracing::warn!(error = %rollback, "cleanup after failed connect");
                }
                self.set_state(ConnectionState::Disconnected);
                self.failed("connect", &e);
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Err(e) = self.transport.disconnect().await {
            tracing::error!(error = %e, "disconnect failed");
            self.failed("disconnect", &e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Encode and write a command.
    ///
    /// When the link is down a connect is requested first, and the write is
    /// attempted whatever the outcome of that request.
    pub async fn send(&mut self, command: Command) -> Result<()> {
        let payload = command.encode()?;

        if !self.state.is_connected() {
            tracing::info!(
                command = command.name(),
                state = %self.state,
                "not connected, reconnecting first"
            );
            if let Err(e) = self.connect().await {
                tracing::warn!(error = %e, "writing without a confirmed connection");
            }
        }

        tracing::debug!(command = command.name(), payload = %hex_dump(&payload), "write");
        if let Err(e) = self.transport.write(&payload).await {
            tracing::error!(command = command.name(), error = %e, "write failed");
            self.failed("write", &e);
            return Err(e.into());
        }
        if let Command::SetTarget { target } = command {
            self.target = target;
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.set_state(ConnectionState::Connected);
                if let Err(e) = self.transport.enable_notifications().await {
                    tracing::warn!(error = %e, "could not enable notifications");
                    self.failed("enable notifications", &e);
                }
                if self.config.probe_on_connect {
                    self.probe().await;
                }
            }
            TransportEvent::ServicesDiscovered(uuids) => {
                self.set_state(ConnectionState::ServicesReady);
                let named = uuids
                    .iter()
                    .map(|uuid| (*uuid, ble::lookup(uuid, "Unknown characteristic")))
                    .collect();
                self.publish(SessionNotice::Characteristics(named));
                if uuids.contains(&EZON_CHARACTERISTIC_UUID) {
                    tracing::info!(uuid = %EZON_CHARACTERISTIC_UUID, "EZON characteristic found");
                    self.publish(SessionNotice::CharacteristicFound);
                } else {
                    tracing::warn!(count = uuids.len(), "EZON characteristic missing");
                    self.publish(SessionNotice::OperationFailed {
                        operation: "discover services",
                        reason: "EZON characteristic not found".to_string(),
                    });
                }
            }
            TransportEvent::DataAvailable(frame) => self.handle_frame(&frame),
            TransportEvent::Disconnected => {
                if self.reassembler.is_accumulating() {
                    tracing::warn!(
                        bytes = self.reassembler.bytes_so_far(),
                        "disconnected during step transfer"
                    );
                }
                self.reassembler.reset();
                self.set_state(ConnectionState::Disconnected);
                self.publish(SessionNotice::Cleared);
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        tracing::debug!(len = frame.len(), hex = %hex_dump(frame), "frame");

        let kind = classify(frame);
        if let FrameKind::Other(raw) = kind {
            self.publish(SessionNotice::Data {
                text: text_lossy(raw),
                hex: hex_dump(raw),
            });
            return;
        }

        let anomalies_before = self.reassembler.anomalies().len();
        let event = self.reassembler.feed(kind, frame);

        // short chunks are padded, not dropped; report them as they happen
        let new_anomalies: Vec<_> = self
            .reassembler
            .anomalies()
            .get(anomalies_before..)
            .unwrap_or_default()
            .to_vec();
        for anomaly in new_anomalies {
            self.publish(SessionNotice::Anomaly(anomaly));
        }

        match event {
            ReassemblyEvent::Started { .. } => self.publish(SessionNotice::TransferStarted),
            ReassemblyEvent::Progress { bytes_so_far } => {
                self.publish(SessionNotice::TransferProgress {
                    bytes_so_far,
                    expected: self.config.expected_minutes,
                })
            }
            ReassemblyEvent::Complete(series) => {
                let summary = StepSummary::from_series(&series, self.target);
                if summary.minutes != self.config.expected_minutes {
                    tracing::warn!(
                        minutes = summary.minutes,
                        expected = self.config.expected_minutes,
                        "step series length differs from a full day"
                    );
                }
                tracing::info!(
                    total = summary.total,
                    ratio = summary.ratio_of_target,
                    "steps ready"
                );
                self.publish(SessionNotice::StepsReady { series, summary });
            }
            ReassemblyEvent::Ignored(anomaly) => self.publish(SessionNotice::Anomaly(anomaly)),
            ReassemblyEvent::NotStepFrame => {}
        }
    }

    async fn probe(&mut self) {
        let command = Command::ConnectProbe;
        let result = match command.encode() {
            Ok(payload) => self.transport.write(&payload).await,
            Err(e) => {
                tracing::error!(error = %e, "probe encoding failed");
                return;
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "connect probe failed");
            self.failed("connect probe", &e);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.publish(SessionNotice::ConnectionChanged(state));
        }
    }

    fn failed(&mut self, operation: &'static str, error: &dyn std::fmt::Display) {
        self.publish(SessionNotice::OperationFailed {
            operation,
            reason: error.to_string(),
        });
    }

    fn publish(&mut self, notice: SessionNotice) {
        // observers that hung up are forgotten
        self.observers.retain(|tx| tx.send(notice.clone()).is_ok());
    }
}
