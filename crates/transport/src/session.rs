//! The single session slot: reuse or reconnect, then authenticate.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    mucnotify_config::DeliveryConfig,
    mucnotify_xmpp::{ConnectionConfig, Jid, SecurityMode, TrustPolicy},
    secrecy::ExposeSecret,
    tracing::{debug, info, warn},
};

use crate::{error::SessionError, server::ServerDefinition};

pub const DEFAULT_PORT: u16 = 5222;
pub const LEGACY_SSL_PORT: u16 = 5223;

/// The retired Google Talk gateway serves the `gmail.com` domain.
const GOOGLE_TALK_HOST: &str = "talk.google.com";
const GOOGLE_TALK_SERVICE: &str = "gmail.com";

/// What the room layer needs from a live chat connection.
#[async_trait]
pub trait ChatSession: Send {
    fn is_connected(&self) -> bool;

    /// SASL, resource binding and session establishment.
    async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        resource: &str,
    ) -> mucnotify_xmpp::Result<()>;

    /// Round trip to the server. Fails only when the stream is gone.
    async fn ping(&mut self) -> mucnotify_xmpp::Result<()>;

    /// Chat-room service domains advertised by the server.
    async fn muc_services(&mut self) -> mucnotify_xmpp::Result<Vec<Jid>>;

    /// Join `room` as `nickname`; returns the occupant address.
    async fn join_room(
        &mut self,
        room: &Jid,
        nickname: &str,
        password: Option<&str>,
    ) -> mucnotify_xmpp::Result<Jid>;

    async fn send_groupchat(&mut self, room: &Jid, body: &str) -> mucnotify_xmpp::Result<()>;

    async fn leave_room(&mut self, occupant: &Jid) -> mucnotify_xmpp::Result<()>;

    /// Idempotent.
    async fn disconnect(&mut self);
}

/// Opens unauthenticated sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, plan: &ConnectionConfig) -> mucnotify_xmpp::Result<Box<dyn ChatSession>>;
}

/// Delivery-wide transport settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub extra_ca_file: Option<PathBuf>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for TransportSettings {
    fn from(delivery: &DeliveryConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(delivery.connect_timeout_secs),
            request_timeout: Duration::from_secs(delivery.request_timeout_secs),
            extra_ca_file: delivery.extra_ca_file.clone(),
        }
    }
}

/// XMPP domain for `host`.
pub fn service_name(host: &str) -> String {
    if host.eq_ignore_ascii_case(GOOGLE_TALK_HOST) {
        GOOGLE_TALK_SERVICE.into()
    } else {
        host.to_string()
    }
}

/// Derive port, security mode and trust from a server definition.
///
/// When a secure connection is required the port defaults to 5223 for
/// legacy SSL (TLS from the first byte) and 5222 otherwise, where STARTTLS
/// becomes mandatory. Without that flag STARTTLS is used only when offered.
pub fn transport_plan(definition: &ServerDefinition, settings: &TransportSettings) -> ConnectionConfig {
    let legacy = definition.enforce_legacy_ssl();
    let (port, security, direct_tls) = if definition.secure_connection_required() {
        let fallback = if legacy {
            LEGACY_SSL_PORT
        } else {
            DEFAULT_PORT
        };
        (
            definition.port().unwrap_or(fallback),
            SecurityMode::Required,
            legacy,
        )
    } else {
        (
            definition.port().unwrap_or(DEFAULT_PORT),
            SecurityMode::Optional,
            false,
        )
    };

    ConnectionConfig {
        host: definition.host().to_string(),
        port,
        service_name: service_name(definition.host()),
        security,
        direct_tls,
        trust: TrustPolicy {
            accept_any_certificate: definition.insecure_accept_any_certificate(),
            extra_ca_file: settings.extra_ca_file.clone(),
        },
        connect_timeout: settings.connect_timeout,
        request_timeout: settings.request_timeout,
    }
}

/// An authenticated session and the definition it was built from.
pub struct Session {
    definition: ServerDefinition,
    handle: Box<dyn ChatSession>,
}

impl Session {
    pub fn definition(&self) -> &ServerDefinition {
        &self.definition
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn chat(&mut self) -> &mut dyn ChatSession {
        self.handle.as_mut()
    }

    /// Still connected and built from an equal definition.
    pub fn reusable_for(&self, definition: &ServerDefinition) -> bool {
        self.is_connected() && self.definition == *definition
    }
}

/// Owns at most one live session.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    settings: TransportSettings,
    slot: Option<Session>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: TransportSettings) -> Self {
        Self {
            connector,
            settings,
            slot: None,
        }
    }

    pub fn has_session(&self) -> bool {
        self.slot.is_some()
    }

    /// Return the stored session when it can serve `definition` and still
    /// answers a ping, otherwise connect and authenticate a new one. A failed
    /// attempt leaves the slot empty.
    pub async fn acquire(&mut self, definition: &ServerDefinition) -> Result<&mut Session, SessionError> {
        if let Some(mut session) = self.slot.take() {
            if session.reusable_for(definition) {
                match session.chat().ping().await {
                    Ok(()) => {
                        info!(host = %definition.host(), "reusing XMPP session");
                        return Ok(self.slot.insert(session));
                    },
                    Err(e) => warn!(host = %definition.host(), error = %e, "stored XMPP session is dead"),
                }
            }
            debug!(
                host = %session.definition().host(),
                connected = session.is_connected(),
                "discarding stale XMPP session"
            );
            session.chat().disconnect().await;
        }

        let plan = transport_plan(definition, &self.settings);
        debug!(
            host = %plan.host,
            port = plan.port,
            service = %plan.service_name,
            security = ?plan.security,
            "stream compression not negotiated"
        );
        if plan.trust.accept_any_certificate {
            warn!(host = %plan.host, "accepting any TLS certificate for this server");
        }

        let mut handle = self
            .connector
            .connect(&plan)
            .await
            .map_err(|source| SessionError::Connect {
                host: definition.host().to_string(),
                source,
            })?;

        let authenticated = handle
            .authenticate(
                definition.username(),
                definition.password().expose_secret(),
                definition.resource(),
            )
            .await;
        if let Err(source) = authenticated {
            handle.disconnect().await;
            return Err(SessionError::Auth {
                username: definition.username().to_string(),
                source,
            });
        }

        info!(
            host = %definition.host(),
            port = plan.port,
            username = %definition.username(),
            "created XMPP session"
        );
        Ok(self.slot.insert(Session {
            definition: definition.clone(),
            handle,
        }))
    }

    /// Disconnect and empty the slot. Idempotent.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.slot.take() {
            session.chat().disconnect().await;
            debug!(host = %session.definition().host(), "released XMPP session");
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{FakeConnector, Script},
        rstest::rstest,
        secrecy::Secret,
    };

    fn server() -> ServerDefinition {
        ServerDefinition::new("chat.example.com", "ci", Secret::new("pw".into()))
    }

    #[rstest]
    #[case::plain(None, false, false, 5222, SecurityMode::Optional, false)]
    #[case::plain_explicit(Some(5333), false, false, 5333, SecurityMode::Optional, false)]
    #[case::legacy_flag_alone_ignored(None, true, false, 5222, SecurityMode::Optional, false)]
    #[case::starttls_required(None, false, true, 5222, SecurityMode::Required, false)]
    #[case::legacy_ssl(None, true, true, 5223, SecurityMode::Required, true)]
    #[case::legacy_ssl_explicit(Some(443), true, true, 443, SecurityMode::Required, true)]
    fn derives_port_and_security(
        #[case] port: Option<u16>,
        #[case] legacy: bool,
        #[case] secure: bool,
        #[case] expected_port: u16,
        #[case] expected_security: SecurityMode,
        #[case] expected_direct_tls: bool,
    ) {
        let def = server()
            .with_port(port)
            .with_legacy_ssl(legacy)
            .with_secure_connection_required(secure);
        let plan = transport_plan(&def, &TransportSettings::default());
        assert_eq!(plan.port, expected_port);
        assert_eq!(plan.security, expected_security);
        assert_eq!(plan.direct_tls, expected_direct_tls);
        assert_eq!(plan.connect_timeout, Duration::from_secs(10));
        assert_eq!(plan.request_timeout, Duration::from_secs(30));
    }

    #[rstest]
    #[case("talk.google.com", "gmail.com")]
    #[case("Talk.Google.com", "gmail.com")]
    #[case("chat.example.com", "chat.example.com")]
    fn google_talk_maps_to_gmail(#[case] host: &str, #[case] service: &str) {
        assert_eq!(service_name(host), service);
        let def = ServerDefinition::new(host, "ci", Secret::new("pw".into()));
        let plan = transport_plan(&def, &TransportSettings::default());
        assert_eq!(plan.host, host);
        assert_eq!(plan.service_name, service);
    }

    #[test]
    fn trust_follows_definition_and_settings() {
        let settings = TransportSettings {
            extra_ca_file: Some("/etc/ssl/internal.pem".into()),
            ..TransportSettings::default()
        };
        let plan = transport_plan(&server(), &settings);
        assert!(!plan.trust.accept_any_certificate);
        assert_eq!(plan.trust.extra_ca_file, settings.extra_ca_file);

        let plan = transport_plan(&server().with_insecure_accept_any_certificate(true), &settings);
        assert!(plan.trust.accept_any_certificate);
    }

    #[tokio::test]
    async fn equal_definition_reuses_session() {
        let connector = FakeConnector::new(Script::default());
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        manager.acquire(&server()).await.unwrap();
        manager.acquire(&server()).await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert!(manager.has_session());
    }

    #[tokio::test]
    async fn changed_definition_reconnects() {
        let connector = FakeConnector::new(Script::default());
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        manager.acquire(&server()).await.unwrap();
        let changed = server().with_port(Some(5223));
        let session = manager.acquire(&changed).await.unwrap();
        assert_eq!(session.definition(), &changed);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.log().iter().filter(|e| *e == "disconnect").count(), 1);
    }

    #[tokio::test]
    async fn disconnected_session_is_not_reused() {
        let connector = FakeConnector::new(Script::default());
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        manager.acquire(&server()).await.unwrap().chat().disconnect().await;
        manager.acquire(&server()).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn session_closed_while_idle_is_replaced() {
        let connector = FakeConnector::new(Script {
            close_when_idle: true,
            ..Script::default()
        });
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        let first = manager.acquire(&server()).await.unwrap();
        let room = Jid::parse("builds@conference.example.com").unwrap();
        let occupant = first.chat().join_room(&room, "CI", None).await.unwrap();
        first.chat().leave_room(&occupant).await.unwrap();
        assert!(first.is_connected());

        let second = manager.acquire(&server()).await.unwrap();
        assert!(second.is_connected());
        assert_eq!(connector.connects(), 2);
        // The failed ping already dropped the stream, so nothing is left to close.
        let log = connector.log();
        let ping = log.iter().position(|e| e == "ping").unwrap();
        assert_eq!(log[ping + 1..], ["connect", "authenticate ci/app-agent"]);
    }

    #[tokio::test]
    async fn live_session_is_pinged_before_reuse() {
        let connector = FakeConnector::new(Script::default());
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        manager.acquire(&server()).await.unwrap();
        manager.acquire(&server()).await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.log(), ["connect", "authenticate ci/app-agent", "ping"]);
    }

    #[tokio::test]
    async fn connect_failure_leaves_slot_empty() {
        let connector = FakeConnector::new(Script {
            refuse_connect: true,
            ..Script::default()
        });
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        let err = manager.acquire(&server()).await.err().unwrap();
        assert!(matches!(err, SessionError::Connect { .. }));
        assert!(!manager.has_session());
    }

    #[tokio::test]
    async fn auth_failure_closes_connection() {
        let connector = FakeConnector::new(Script {
            reject_auth: true,
            ..Script::default()
        });
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        let err = manager.acquire(&server()).await.err().unwrap();
        assert!(matches!(err, SessionError::Auth { .. }));
        assert!(!manager.has_session());
        assert_eq!(connector.log(), ["connect", "authenticate ci/app-agent", "disconnect"]);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let connector = FakeConnector::new(Script::default());
        let mut manager = SessionManager::new(connector.clone(), TransportSettings::default());
        manager.acquire(&server()).await.unwrap();
        manager.release().await;
        manager.release().await;
        assert!(!manager.has_session());
        assert_eq!(connector.log().iter().filter(|e| *e == "disconnect").count(), 1);
    }
}
