use crate::outcome::DeliveryOutcome;

/// A recipient configuration that cannot be used. Raised before any
/// network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("You must enter a MUC room JID")]
    MissingRoom,

    #[error("Invalid format, should be roomname@conference-server-url")]
    MalformedRoomAddress(String),
}

/// Failure to obtain a usable session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: mucnotify_xmpp::Error,
    },

    #[error("authentication as {username} failed: {source}")]
    Auth {
        username: String,
        #[source]
        source: mucnotify_xmpp::Error,
    },
}

impl SessionError {
    pub fn outcome(&self) -> DeliveryOutcome {
        match self {
            Self::Connect { .. } => DeliveryOutcome::ConnectFailed,
            Self::Auth { .. } => DeliveryOutcome::AuthFailed,
        }
    }
}
