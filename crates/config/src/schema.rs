//! Config schema types (servers, delivery policy, substitution variables).

use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MucNotifyConfig {
    /// Registered messaging servers. Only the first entry is ever used.
    pub servers: Vec<ServerEntry>,
    pub delivery: DeliveryConfig,
    /// Values for `${name}` placeholders in recipient fields.
    pub variables: HashMap<String, String>,
}

/// One XMPP server registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    pub host: String,

    /// Explicit port. When unset the port is derived from the security flags.
    pub port: Option<u16>,

    pub username: String,

    #[serde(serialize_with = "serialize_option_secret")]
    pub password: Option<Secret<String>>,

    /// Client resource. Blank falls back to the transport default.
    pub resource: Option<String>,

    /// Use TLS from the first byte (historically port 5223) instead of STARTTLS.
    pub enforce_legacy_ssl: bool,

    pub secure_connection_required: bool,

    /// Skip certificate and hostname verification entirely.
    pub insecure_accept_any_certificate: bool,
}

/// Delivery policy shared by every notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Keep the XMPP session open between deliveries while the server
    /// definition is unchanged. Off means disconnect after every send.
    pub session_reuse: bool,

    pub connect_timeout_secs: u64,

    /// Upper bound for every request/response exchange after connect.
    pub request_timeout_secs: u64,

    /// Nickname label used when the recipient does not set one.
    pub default_nickname: String,

    /// PEM bundle trusted in addition to the system roots.
    pub extra_ca_file: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            session_reuse: false,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            default_nickname: "Build Agent".into(),
            extra_ca_file: None,
        }
    }
}

impl MucNotifyConfig {
    /// The server the transport will use: single server, first found.
    pub fn first_server(&self) -> Option<&ServerEntry> {
        self.servers.first()
    }
}

/// Serialize an optional secret as its plain value (config files only).
pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(value) => serializer.serialize_some(value.expose_secret()),
        None => serializer.serialize_none(),
    }
}
