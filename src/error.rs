use thiserror::Error;

/// The primary error type for the `meitrack-gprs` library.
#[derive(Error, Debug)]
pub enum GprsError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("declared length {0} exceeds the protocol maximum")]
    OverSize(usize),

    #[error("payload carries {actual} fields but the schema allows {expected}")]
    FieldCount { expected: usize, actual: usize },

    #[error("unknown command type: {0}")]
    BadCommand(String),

    #[error("checksum mismatch: computed {computed:02X}, frame declares {declared}")]
    Checksum { computed: u8, declared: String },

    #[error("aggregator state mismatch: {0}")]
    StateMismatch(String),

    #[error("parameter out of range: {0}")]
    Parameter(String),

    #[error(transparent)]
    Ota(#[from] OtaError),
}

/// Errors raised while driving an over-the-air firmware update.
#[derive(Error, Debug)]
pub enum OtaError {
    #[error("device code mismatch: expected {expected}, device reported {actual}")]
    DeviceCodeMismatch { expected: String, actual: String },

    #[error("device rejected {command}: {response}")]
    Nack { command: String, response: String },

    #[error("no response to {command} within {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    #[error("OTA file name mismatch: expected {expected}, device reported {actual}")]
    FileNameMismatch { expected: String, actual: String },
}
