//! EZON BLE Controller
//!
//! Talks to an EZON fitness tracker: a [`Session`] drives the protocol engine
//! from `ezon-proto` over any [`Transport`], and [`ble::BleTransport`] is the
//! btleplug implementation of that transport.
//!
//! # Example
//!
//! ```ignore
//! use ezon_ble_controller::{FileSettings, Session, SessionConfig, ble, session};
//! use ezon_proto::Command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = ble::get_adapter().await?;
//!     let (handle, inbox) = session::channel();
//!     let transport = ble::BleTransport::new(adapter, handle.event_sink());
//!
//!     let settings = FileSettings::open_default()?;
//!     let config = SessionConfig::new("AA:BB:CC:DD:EE:FF");
//!     let mut session = Session::new(transport, config, &settings);
//!     let mut notices = session.subscribe();
//!     tokio::spawn(session.run(inbox));
//!
//!     handle.send_command(Command::RequestPin).await?;
//!     while let Some(notice) = notices.recv().await {
//!         println!("{notice:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
mod error;
pub mod session;
mod settings;
mod transport;

pub use error::{Error, Result, SettingsError, TransportError};
pub use session::{
    ConnectionState, EventSink, Session, SessionConfig, SessionHandle, SessionInput, SessionNotice,
};
pub use settings::{
    DeviceIdentity, FileSettings, MemorySettings, Settings, SettingsStore, ezon_home,
};
pub use transport::{Transport, TransportEvent};
