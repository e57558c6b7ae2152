use thiserror::Error;

/// SerialMon unified error type
#[derive(Error, Debug)]
pub enum SerialMonError {
    #[error("Failed to open serial port '{path}': {message}")]
    Open { path: String, message: String },

    #[error("Connection '{key}' not found")]
    NotFound { key: String },

    #[error("Failed to write to '{key}': {message}")]
    Write { key: String, message: String },

    #[error("Stream error on '{key}': {message}")]
    Stream { key: String, message: String },

    #[error("Connection '{key}' is already reconnecting")]
    ReconnectInProgress { key: String },

    #[error("Failed to list serial ports: {0}")]
    Enumerate(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerialMonError {
    /// Stable tag used when the error crosses the device service boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            SerialMonError::Open { .. } => "open",
            SerialMonError::NotFound { .. } => "not_found",
            SerialMonError::Write { .. } => "write",
            SerialMonError::Stream { .. } => "stream",
            SerialMonError::ReconnectInProgress { .. } => "reconnect_in_progress",
            SerialMonError::Enumerate(_) => "enumerate",
            SerialMonError::Config { .. } => "config",
            SerialMonError::InvalidInput(_) => "invalid_input",
            SerialMonError::Output(_) => "output",
            SerialMonError::Io(_) => "io",
        }
    }

    pub(crate) fn not_found(key: impl ToString) -> Self {
        SerialMonError::NotFound { key: key.to_string() }
    }
}

impl From<serialport::Error> for SerialMonError {
    fn from(err: serialport::Error) -> Self {
        SerialMonError::Enumerate(err.to_string())
    }
}

pub type SerialMonResult<T> = Result<T, SerialMonError>;
