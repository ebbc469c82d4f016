use std::sync::{Arc, Mutex};

use ezon_ble_controller::{
    ConnectionState, Error, EventSink, MemorySettings, Session, SessionConfig, SessionNotice,
    Transport, TransportError, TransportEvent, session,
};
use ezon_proto::{Command, ProtocolAnomaly, ble::EZON_CHARACTERISTIC_UUID};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Connect(String),
    Disconnect,
    Write(Vec<u8>),
    EnableNotifications,
}

/// Records every call; failures are switched on per test
#[derive(Clone, Default)]
struct MockTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    /// Where link events go, like a real radio would report them
    sink: Option<EventSink>,
    fail_connect: bool,
    /// Report the link up, then fail the rest of the setup
    fail_after_link_up: bool,
    fail_write: bool,
}

impl MockTransport {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.record(Call::Connect(address.to_string()));
        if self.fail_connect {
            return Err(TransportError::DeviceNotFound(address.to_string()));
        }
        if self.fail_after_link_up {
            self.emit(TransportEvent::Connected);
            return Err(TransportError::CharacteristicNotFound);
        }
        Ok(true)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(Call::Disconnect);
        self.emit(TransportEvent::Disconnected);
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.record(Call::Write(payload.to_vec()));
        if self.fail_write {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn enable_notifications(&mut self) -> Result<(), TransportError> {
        self.record(Call::EnableNotifications);
        Ok(())
    }
}

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

fn session_with(
    transport: MockTransport,
) -> (Session<MockTransport>, UnboundedReceiver<SessionNotice>) {
    let settings = MemorySettings::with_target(1000);
    let mut session = Session::new(transport, SessionConfig::new(ADDRESS), &settings);
    let notices = session.subscribe();
    (session, notices)
}

fn drain(rx: &mut UnboundedReceiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

fn step_frame(marker: u8, value: u8) -> Vec<u8> {
    let mut frame = vec![0x50, marker];
    frame.extend_from_slice(&[value; 17]);
    frame
}

async fn feed(session: &mut Session<MockTransport>, frame: Vec<u8>) {
    session.handle_event(TransportEvent::DataAvailable(frame)).await;
}

#[tokio::test]
async fn send_while_disconnected_connects_then_writes() {
    let transport = MockTransport::default();
    let (mut session, _notices) = session_with(transport.clone());

    session.send(Command::RequestPin).await.unwrap();

    assert_eq!(
        transport.calls(),
        vec![
            Call::Connect(ADDRESS.to_string()),
            Call::Write(vec![0x43, 0x00, 0x03, 0x09, 0x06, 0x08]),
        ]
    );
    assert_eq!(session.state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn send_while_connected_writes_only() {
    let transport = MockTransport::default();
    let (mut session, _notices) = session_with(transport.clone());
    session.handle_event(TransportEvent::Connected).await;

    session.send(Command::DisableAlarm).await.unwrap();

    assert_eq!(
        transport.calls(),
        vec![
            Call::EnableNotifications,
            Call::Write(vec![0x41, 0x43, 0x01, 0x00, 0x00, 0x44]),
        ]
    );
}

#[tokio::test]
async fn write_is_attempted_when_connect_fails() {
    let transport = MockTransport { fail_connect: true, ..Default::default() };
    let (mut session, mut notices) = session_with(transport.clone());

    session.send(Command::CallReminder).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1], Call::Disconnect);
    assert!(matches!(calls[2], Call::Write(_)));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(drain(&mut notices)
        .iter()
        .any(|n| matches!(n, SessionNotice::OperationFailed { operation: "connect", .. })));
}

#[tokio::test]
async fn invalid_command_is_rejected_before_io() {
    let transport = MockTransport::default();
    let (mut session, _notices) = session_with(transport.clone());

    let err = session.send(Command::SetAlarm { hour: 24, minute: 0 }).await.unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn write_failure_surfaces_unchanged() {
    let transport = MockTransport { fail_write: true, ..Default::default() };
    let (mut session, mut notices) = session_with(transport.clone());
    session.handle_event(TransportEvent::Connected).await;

    let err = session.send(Command::DisableTarget).await.unwrap_err();

    assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
    assert!(drain(&mut notices)
        .iter()
        .any(|n| matches!(n, SessionNotice::OperationFailed { operation: "write", .. })));
}

#[tokio::test]
async fn connection_lifecycle_notices() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    session.handle_event(TransportEvent::Connected).await;
    session
        .handle_event(TransportEvent::ServicesDiscovered(vec![EZON_CHARACTERISTIC_UUID]))
        .await;
    assert_eq!(session.state(), ConnectionState::ServicesReady);
    session.handle_event(TransportEvent::Disconnected).await;

    assert_eq!(
        drain(&mut notices),
        vec![
            SessionNotice::ConnectionChanged(ConnectionState::Connected),
            SessionNotice::ConnectionChanged(ConnectionState::ServicesReady),
            SessionNotice::Characteristics(vec![(
                EZON_CHARACTERISTIC_UUID,
                "Main ezon characteristic"
            )]),
            SessionNotice::CharacteristicFound,
            SessionNotice::ConnectionChanged(ConnectionState::Disconnected),
            SessionNotice::Cleared,
        ]
    );
}

#[tokio::test]
async fn probe_on_connect() {
    let transport = MockTransport::default();
    let mut config = SessionConfig::new(ADDRESS);
    config.probe_on_connect = true;
    let mut session = Session::new(transport.clone(), config, &MemorySettings::default());

    session.handle_event(TransportEvent::Connected).await;

    let mut probe = vec![0u8; 21];
    probe[0] = 0x43;
    assert_eq!(transport.calls(), vec![Call::EnableNotifications, Call::Write(probe)]);
}

#[tokio::test]
async fn other_frames_surface_as_data() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, b"TIME".to_vec()).await;

    assert_eq!(
        drain(&mut notices),
        vec![SessionNotice::Data {
            text: "TIME".to_string(),
            hex: "54 49 4D 45".to_string(),
        }]
    );
}

#[tokio::test]
async fn step_transfer_produces_summary() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, step_frame(0x01, 1)).await;
    feed(&mut session, step_frame(0x4F, 2)).await;

    let notices = drain(&mut notices);
    assert_eq!(notices[0], SessionNotice::TransferStarted);
    assert_eq!(
        notices[1],
        SessionNotice::TransferProgress { bytes_so_far: 17, expected: 1440 }
    );
    let SessionNotice::StepsReady { series, summary } = &notices[2] else {
        panic!("expected steps, got {:?}", notices[2]);
    };
    assert_eq!(series.len(), 34);
    assert_eq!(summary.total, 17 + 34);
    assert_eq!(summary.by_hour[0], 51);
    // target 1000 from settings
    assert_eq!(summary.ratio_of_target, 51.0 / 10.0 / 100.0);
}

#[tokio::test]
async fn restart_keeps_only_frames_after_second_start() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, step_frame(0x01, 9)).await;
    feed(&mut session, step_frame(0x02, 9)).await;
    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, step_frame(0x01, 1)).await;
    feed(&mut session, step_frame(0x4F, 1)).await;

    let ready = drain(&mut notices)
        .into_iter()
        .find_map(|n| match n {
            SessionNotice::StepsReady { series, .. } => Some(series),
            _ => None,
        })
        .expect("transfer completed");
    assert_eq!(ready, vec![1u8; 34]);
}

#[tokio::test]
async fn end_without_start_is_an_anomaly() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, step_frame(0x4F, 1)).await;

    assert_eq!(
        drain(&mut notices),
        vec![SessionNotice::Anomaly(ProtocolAnomaly::EndWithoutStart)]
    );
}

#[tokio::test]
async fn disconnect_during_transfer_drops_buffer() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, step_frame(0x01, 5)).await;
    session.handle_event(TransportEvent::Disconnected).await;
    assert!(!session.reassembler().is_accumulating());

    feed(&mut session, step_frame(0x02, 5)).await;
    feed(&mut session, step_frame(0x4F, 5)).await;

    let notices = drain(&mut notices);
    assert!(notices.contains(&SessionNotice::Cleared));
    assert!(notices.contains(&SessionNotice::Anomaly(
        ProtocolAnomaly::ChunkOutsideTransfer { marker: 0x02 }
    )));
    assert!(!notices.iter().any(|n| matches!(n, SessionNotice::StepsReady { .. })));
}

#[tokio::test]
async fn short_chunk_is_reported() {
    let (mut session, mut notices) = session_with(MockTransport::default());

    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, vec![0x50, 0x01, 3]).await;

    let notices = drain(&mut notices);
    assert!(notices.contains(&SessionNotice::Anomaly(ProtocolAnomaly::ShortChunk { len: 3 })));
    assert!(notices.contains(&SessionNotice::TransferProgress {
        bytes_so_far: 17,
        expected: 1440
    }));
}

#[tokio::test]
async fn run_loop_serializes_events_and_commands() {
    let transport = MockTransport::default();
    let (session, mut notices) = session_with(transport.clone());
    let (handle, inbox) = session::channel();
    let sink = handle.event_sink();
    let task = tokio::spawn(session.run(inbox));

    assert!(sink.emit(TransportEvent::Connected));
    handle.send_command(Command::ConnectProbe).await.unwrap();
    assert!(sink.emit(TransportEvent::DataAvailable(step_frame(0x00, 0))));
    assert!(sink.emit(TransportEvent::DataAvailable(step_frame(0x4F, 7))));
    handle.disconnect().await.unwrap();

    drop(handle);
    task.await.unwrap();
    assert!(!sink.emit(TransportEvent::Connected));

    let calls = transport.calls();
    assert_eq!(calls[0], Call::EnableNotifications);
    assert!(matches!(&calls[1], Call::Write(p) if p.len() == 21));
    assert_eq!(calls[2], Call::Disconnect);

    let notices = drain(&mut notices);
    assert!(notices.iter().any(|n| matches!(
        n,
        SessionNotice::StepsReady { series, .. } if series.len() == 17
    )));
}

#[tokio::test]
async fn failed_connect_is_retried_on_next_send() {
    let (handle, inbox) = session::channel();
    let transport = MockTransport {
        sink: Some(handle.event_sink()),
        fail_after_link_up: true,
        ..Default::default()
    };
    let (session, mut notices) = session_with(transport.clone());
    let task = tokio::spawn(session.run(inbox));

    assert!(handle.connect().await.is_err());
    handle.send_command(Command::RequestPin).await.unwrap();
    drop(handle);
    task.await.unwrap();

    let calls = transport.calls();
    let write = calls
        .iter()
        .position(|c| matches!(c, Call::Write(_)))
        .expect("write attempted");
    let connects = calls[..write]
        .iter()
        .filter(|c| matches!(c, Call::Connect(_)))
        .count();
    assert_eq!(connects, 2, "{calls:?}");

    // every link-up seen by the session was followed by a link-down
    let states: Vec<_> = drain(&mut notices)
        .into_iter()
        .filter_map(|n| match n {
            SessionNotice::ConnectionChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states.last(), Some(&ConnectionState::Disconnected));
}

#[tokio::test]
async fn target_sent_to_tracker_is_used_for_summaries() {
    let (mut session, mut notices) = session_with(MockTransport::default());
    assert_eq!(session.target(), 1000);
    session.handle_event(TransportEvent::Connected).await;

    session.send(Command::SetTarget { target: 5000 }).await.unwrap();
    assert_eq!(session.target(), 5000);

    feed(&mut session, step_frame(0x00, 0)).await;
    feed(&mut session, step_frame(0x4F, 10)).await;

    let summary = drain(&mut notices)
        .into_iter()
        .find_map(|n| match n {
            SessionNotice::StepsReady { summary, .. } => Some(summary),
            _ => None,
        })
        .expect("transfer completed");
    assert_eq!(summary.ratio_of_target, 170.0 / 50.0 / 100.0);
}

#[tokio::test]
async fn rejected_target_keeps_previous_one() {
    let (mut session, _notices) = session_with(MockTransport::default());

    assert!(session.send(Command::SetTarget { target: 1500 }).await.is_err());
    assert_eq!(session.target(), 1000);
}
