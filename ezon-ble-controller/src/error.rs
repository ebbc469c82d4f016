use ezon_proto::EncodeError;

/// Failures reported by a [`crate::Transport`]
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("EZON characteristic not found")]
    CharacteristicNotFound,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("no home directory, set EZON_HOME")]
    NoHome,
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    InvalidArgument(#[from] EncodeError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("session closed")]
    SessionClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
