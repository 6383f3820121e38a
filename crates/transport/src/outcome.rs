use std::fmt;

/// How one notification ended. Every path through the dispatcher produces
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Delivered,
    /// No server registered; nothing was attempted.
    NoServerConfigured,
    /// The room target failed validation; nothing was attempted.
    InvalidTarget,
    ConnectFailed,
    AuthFailed,
    RoomDiscoveryFailed,
    JoinFailed,
    SendFailed,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::NoServerConfigured => "no_server_configured",
            Self::InvalidTarget => "invalid_target",
            Self::ConnectFailed => "connect_failed",
            Self::AuthFailed => "auth_failed",
            Self::RoomDiscoveryFailed => "room_discovery_failed",
            Self::JoinFailed => "join_failed",
            Self::SendFailed => "send_failed",
        }
    }

    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }

    /// Outcomes that reflect a failed attempt rather than a skipped one.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Delivered | Self::NoServerConfigured)
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
