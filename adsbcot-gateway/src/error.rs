//! Gateway error type.
//!
//! Record rejections are not errors; see `adsbcot_core::Rejection`. These
//! variants cover configuration mistakes and transport failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid feed URL {0:?}: expected scheme://target")]
    InvalidFeedUrl(String),

    #[error("unsupported feed scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid data type {0:?}: expected raw or beast")]
    InvalidDataType(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {0} lost")]
    ConnectionLost(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] adsbcot_core::CotError),

    #[error("output queue closed")]
    QueueClosed,

    #[error("gave up on {addr} after {attempts} attempts")]
    ReconnectExhausted { addr: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// A configuration error reported through the core error type.
    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Core(adsbcot_core::CotError::Config(msg.into()))
    }
}
