//! The server a notification is delivered through.

use std::fmt;

use {
    mucnotify_config::ServerEntry,
    secrecy::{ExposeSecret, Secret},
};

/// Resource used when the configuration leaves it blank.
pub const DEFAULT_RESOURCE: &str = "app-agent";

/// One messaging server endpoint with its credentials.
///
/// Built fresh on every directory lookup. Two definitions compare equal when
/// every field matches, and that equality decides whether an open session
/// may be reused.
#[derive(Clone)]
pub struct ServerDefinition {
    host: String,
    port: Option<u16>,
    username: String,
    password: Secret<String>,
    resource: String,
    enforce_legacy_ssl: bool,
    secure_connection_required: bool,
    insecure_accept_any_certificate: bool,
}

impl ServerDefinition {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: username.into(),
            password,
            resource: DEFAULT_RESOURCE.into(),
            enforce_legacy_ssl: false,
            secure_connection_required: false,
            insecure_accept_any_certificate: false,
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Blank resources fall back to [`DEFAULT_RESOURCE`].
    pub fn with_resource(mut self, resource: Option<&str>) -> Self {
        self.resource = match resource.map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => DEFAULT_RESOURCE.into(),
        };
        self
    }

    pub fn with_legacy_ssl(mut self, enforce: bool) -> Self {
        self.enforce_legacy_ssl = enforce;
        self
    }

    pub fn with_secure_connection_required(mut self, required: bool) -> Self {
        self.secure_connection_required = required;
        self
    }

    pub fn with_insecure_accept_any_certificate(mut self, accept: bool) -> Self {
        self.insecure_accept_any_certificate = accept;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &Secret<String> {
        &self.password
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn enforce_legacy_ssl(&self) -> bool {
        self.enforce_legacy_ssl
    }

    pub fn secure_connection_required(&self) -> bool {
        self.secure_connection_required
    }

    pub fn insecure_accept_any_certificate(&self) -> bool {
        self.insecure_accept_any_certificate
    }
}

impl PartialEq for ServerDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
            && self.resource == other.resource
            && self.enforce_legacy_ssl == other.enforce_legacy_ssl
            && self.secure_connection_required == other.secure_connection_required
            && self.insecure_accept_any_certificate == other.insecure_accept_any_certificate
    }
}

impl Eq for ServerDefinition {}

impl fmt::Debug for ServerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDefinition")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("resource", &self.resource)
            .field("enforce_legacy_ssl", &self.enforce_legacy_ssl)
            .field("secure_connection_required", &self.secure_connection_required)
            .field(
                "insecure_accept_any_certificate",
                &self.insecure_accept_any_certificate,
            )
            .finish()
    }
}

impl From<&ServerEntry> for ServerDefinition {
    fn from(entry: &ServerEntry) -> Self {
        let password = entry
            .password
            .clone()
            .unwrap_or_else(|| Secret::new(String::new()));
        Self::new(entry.host.trim(), entry.username.trim(), password)
            .with_port(entry.port)
            .with_resource(entry.resource.as_deref())
            .with_legacy_ssl(entry.enforce_legacy_ssl)
            .with_secure_connection_required(entry.secure_connection_required)
            .with_insecure_accept_any_certificate(entry.insecure_accept_any_certificate)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn server(host: &str, username: &str, password: &str) -> ServerDefinition {
        ServerDefinition::new(host, username, Secret::new(password.into()))
            .with_port(Some(5222))
            .with_secure_connection_required(true)
    }

    fn base() -> ServerDefinition {
        server("chat.example.com", "ci", "pw")
    }

    #[test]
    fn equal_fields_are_equal() {
        assert_eq!(base(), base());
    }

    #[rstest]
    #[case::host(server("other.example.com", "ci", "pw"))]
    #[case::username(server("chat.example.com", "deploy", "pw"))]
    #[case::password(server("chat.example.com", "ci", "changed"))]
    #[case::port(base().with_port(Some(5223)))]
    #[case::no_port(base().with_port(None))]
    #[case::resource(base().with_resource(Some("runner-2")))]
    #[case::legacy_ssl(base().with_legacy_ssl(true))]
    #[case::secure_required(base().with_secure_connection_required(false))]
    #[case::accept_any(base().with_insecure_accept_any_certificate(true))]
    fn any_differing_field_breaks_equality(#[case] other: ServerDefinition) {
        assert_ne!(base(), other);
    }

    #[test]
    fn blank_resource_uses_default() {
        assert_eq!(base().resource(), DEFAULT_RESOURCE);
        assert_eq!(base().with_resource(Some("  ")).resource(), DEFAULT_RESOURCE);
        assert_eq!(base().with_resource(Some("ci-7")).resource(), "ci-7");
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", base());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("\"pw\""));
    }

    #[test]
    fn from_config_entry() {
        let entry = ServerEntry {
            host: " chat.example.com ".into(),
            port: None,
            username: "ci".into(),
            password: Some(Secret::new("pw".into())),
            resource: None,
            enforce_legacy_ssl: true,
            secure_connection_required: true,
            insecure_accept_any_certificate: false,
        };
        let def = ServerDefinition::from(&entry);
        assert_eq!(def.host(), "chat.example.com");
        assert_eq!(def.resource(), DEFAULT_RESOURCE);
        assert!(def.enforce_legacy_ssl());
        assert_eq!(def.password().expose_secret(), "pw");
    }

    #[test]
    fn missing_password_is_empty() {
        let entry = ServerEntry {
            host: "chat.example.com".into(),
            ..ServerEntry::default()
        };
        assert_eq!(ServerDefinition::from(&entry).password().expose_secret(), "");
    }
}
