//! Transport seam between the session and the radio

use std::future::Future;

use uuid::Uuid;

use crate::error::TransportError;

/// Events a transport delivers to the session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// UUIDs of the characteristics found on the tracker
    ServicesDiscovered(Vec<Uuid>),
    /// One notification or read of the EZON characteristic
    DataAvailable(Vec<u8>),
}

/// Byte link to one tracker.
///
/// Implementations push [`TransportEvent`]s through an
/// [`EventSink`](crate::EventSink) handed to them at construction.
pub trait Transport {
    /// Start connecting to `address`. `Ok(false)` when the request was not
    /// accepted; success is confirmed later by a `Connected` event.
    fn connect(
        &mut self,
        address: &str,
    ) -> impl Future<Output = Result<bool, TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Write a payload to the EZON characteristic
    fn write(&mut self, payload: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribe to notifications of the EZON characteristic
    fn enable_notifications(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
