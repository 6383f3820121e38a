use std::time::Duration;

/// Errors raised by the XMPP client stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response to {operation} within {timeout:?}")]
    NoResponse {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("not connected")]
    NotConnected,

    #[error("stream closed by server")]
    StreamClosed,

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("malformed xml: {0}")]
    Xml(String),

    #[error("unexpected {got} while waiting for {expected}")]
    Unexpected { expected: &'static str, got: String },

    #[error("tls: {0}")]
    Tls(String),

    #[error("server does not offer TLS but the connection requires it")]
    TlsRequired,

    #[error("no supported SASL mechanism (server offers: {0})")]
    NoMechanism(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("resource binding failed: {0}")]
    Bind(String),

    #[error("{condition}{}", text_suffix(.text))]
    Stanza {
        condition: String,
        text: Option<String>,
    },

    #[error("invalid address: {0}")]
    InvalidJid(String),
}

fn text_suffix(text: &Option<String>) -> String {
    text.as_deref().map(|t| format!(": {t}")).unwrap_or_default()
}

impl Error {
    /// Build a stanza error from a defined condition name (`not-authorized`,
    /// `item-not-found`, ...).
    pub fn stanza(condition: impl Into<String>) -> Self {
        Self::Stanza {
            condition: condition.into(),
            text: None,
        }
    }
}

impl Error {
    /// Errors after which the stream cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::NoResponse { .. }
                | Error::NotConnected
                | Error::StreamClosed
                | Error::StreamError(_)
                | Error::Xml(_)
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
