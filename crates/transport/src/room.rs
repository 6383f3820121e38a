//! One room visit: discover, join, send, leave.

use {
    mucnotify_xmpp::Jid,
    rand::{Rng, distr::Alphanumeric},
    tracing::{debug, error, info, warn},
};

use crate::{outcome::DeliveryOutcome, recipient::RoomTarget, session::ChatSession};

pub const DEFAULT_NICKNAME: &str = "Build Agent";
const NICKNAME_SUFFIX_LEN: usize = 4;

/// `label` plus a space and four random uppercase alphanumerics, so two
/// agents posting to the same room do not collide.
pub fn unique_nickname(label: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NICKNAME_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{label} {suffix}")
}

/// Resolve the bare room address. An empty domain (`room@`) takes the first
/// discovered chat service.
pub fn resolve_room(address: &str, services: &[Jid]) -> Option<Jid> {
    let address = address.trim();
    let address = match (address.strip_suffix('@'), services.first()) {
        (Some(local), Some(service)) => format!("{local}@{}", service.domain()),
        _ => address.to_string(),
    };
    let room = Jid::parse(&address).ok()?;
    room.local()?;
    Some(room.bare())
}

/// Delivers a single message to a single room over an authenticated session.
#[derive(Debug, Clone)]
pub struct RoomTransport {
    default_nickname: String,
    keep_session: bool,
}

impl Default for RoomTransport {
    fn default() -> Self {
        Self::new(DEFAULT_NICKNAME, false)
    }
}

impl RoomTransport {
    /// `keep_session` leaves the session connected after a delivery so the
    /// next one can reuse it.
    pub fn new(default_nickname: impl Into<String>, keep_session: bool) -> Self {
        let default_nickname = default_nickname.into();
        let default_nickname = if default_nickname.trim().is_empty() {
            DEFAULT_NICKNAME.to_string()
        } else {
            default_nickname.trim().to_string()
        };
        Self {
            default_nickname,
            keep_session,
        }
    }

    pub fn nickname_for(&self, target: &RoomTarget) -> String {
        unique_nickname(target.nickname().unwrap_or(&self.default_nickname))
    }

    pub async fn deliver(
        &self,
        session: &mut dyn ChatSession,
        target: &RoomTarget,
        message: &str,
    ) -> DeliveryOutcome {
        let services = match session.muc_services().await {
            Ok(services) if !services.is_empty() => services,
            Ok(_) => {
                error!(room = %target.room_address, "server advertises no chat room service");
                session.disconnect().await;
                return DeliveryOutcome::RoomDiscoveryFailed;
            },
            Err(e) => {
                error!(room = %target.room_address, error = %e, "chat room service discovery failed");
                session.disconnect().await;
                return DeliveryOutcome::RoomDiscoveryFailed;
            },
        };

        let Some(room) = resolve_room(&target.room_address, &services) else {
            error!(room = %target.room_address, "room address is not a usable chat address");
            session.disconnect().await;
            return DeliveryOutcome::JoinFailed;
        };
        if !services.iter().any(|s| s.domain() == room.domain()) {
            warn!(
                room = %room,
                discovered = ?services.iter().map(Jid::to_string).collect::<Vec<_>>(),
                "room is not on a discovered chat service, trying it anyway"
            );
        }

        let nickname = self.nickname_for(target);
        let occupant = match session.join_room(&room, &nickname, target.password()).await {
            Ok(occupant) => occupant,
            Err(e) => {
                error!(room = %room, nickname = %nickname, error = %e, "failed to join room");
                session.disconnect().await;
                return DeliveryOutcome::JoinFailed;
            },
        };
        debug!(room = %room, nickname = %nickname, "joined room");

        let outcome = match session.send_groupchat(&room, message).await {
            Ok(()) => {
                info!(room = %room, nickname = %nickname, "notification delivered");
                DeliveryOutcome::Delivered
            },
            Err(e) => {
                error!(room = %room, error = %e, "failed to send message to room");
                DeliveryOutcome::SendFailed
            },
        };

        if let Err(e) = session.leave_room(&occupant).await {
            debug!(room = %room, error = %e, "leaving room failed");
        }
        if !self.keep_session {
            session.disconnect().await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            server::ServerDefinition,
            session::{Connector, TransportSettings, transport_plan},
            testing::{FakeConnector, Script},
        },
        secrecy::Secret,
        std::{collections::HashSet, sync::Arc},
    };

    async fn session(script: Script) -> (Arc<FakeConnector>, Box<dyn ChatSession>) {
        let connector = FakeConnector::new(script);
        let server = ServerDefinition::new("chat.example.com", "ci", Secret::new("pw".into()));
        let plan = transport_plan(&server, &TransportSettings::default());
        let handle = connector.connect(&plan).await.unwrap();
        (connector, handle)
    }

    #[test]
    fn nickname_has_random_uppercase_suffix() {
        let nick = unique_nickname("CI");
        let (label, suffix) = nick.rsplit_once(' ').unwrap();
        assert_eq!(label, "CI");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn nicknames_for_same_room_differ() {
        let rooms = RoomTransport::default();
        let target = RoomTarget::new("builds@conference.example.com");
        let nicks: HashSet<String> = (0..20).map(|_| rooms.nickname_for(&target)).collect();
        assert!(nicks.len() > 1);
        assert!(nicks.iter().all(|n| n.starts_with("Build Agent ")));
    }

    #[test]
    fn preferred_nickname_wins_over_default() {
        let rooms = RoomTransport::new("Deployer", false);
        let target = RoomTarget::new("a@b").with_nickname(Some("Nightly"));
        assert!(rooms.nickname_for(&target).starts_with("Nightly "));
        assert!(rooms.nickname_for(&RoomTarget::new("a@b")).starts_with("Deployer "));
        assert!(
            RoomTransport::new("  ", false)
                .nickname_for(&RoomTarget::new("a@b"))
                .starts_with("Build Agent ")
        );
    }

    #[test]
    fn resolves_room_addresses() {
        let services = [Jid::parse("conference.example.com").unwrap()];
        assert_eq!(
            resolve_room("builds@", &services).unwrap().to_string(),
            "builds@conference.example.com"
        );
        assert_eq!(
            resolve_room("builds@muc.other.org", &services).unwrap().to_string(),
            "builds@muc.other.org"
        );
        assert_eq!(
            resolve_room("builds@conference.example.com/ignored", &services)
                .unwrap()
                .to_string(),
            "builds@conference.example.com"
        );
        assert!(resolve_room("@conference.example.com", &services).is_none());
        assert!(resolve_room("builds@", &[]).is_none());
    }

    #[tokio::test]
    async fn delivers_and_disconnects() {
        let (connector, mut handle) = session(Script::default()).await;
        let target = RoomTarget::new("builds@conference.example.com").with_password(Some("pw"));
        let outcome = RoomTransport::new("CI", false)
            .deliver(handle.as_mut(), &target, "build 42 passed")
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert!(!handle.is_connected());

        let log = connector.log();
        assert_eq!(log[1], "discover");
        assert!(log[2].starts_with("join builds@conference.example.com as CI "));
        assert!(log[2].ends_with("password=pw"));
        assert_eq!(log[3], "send builds@conference.example.com: build 42 passed");
        assert!(log[4].starts_with("leave builds@conference.example.com/CI "));
        assert_eq!(log[5], "disconnect");
    }

    #[tokio::test]
    async fn keep_session_stays_connected() {
        let (connector, mut handle) = session(Script::default()).await;
        let outcome = RoomTransport::new("CI", true)
            .deliver(handle.as_mut(), &RoomTarget::new("builds@"), "hello")
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert!(handle.is_connected());
        assert!(connector.log()[2].starts_with("join builds@conference.example.com as CI "));
    }

    #[tokio::test]
    async fn empty_discovery_skips_join() {
        let (connector, mut handle) = session(Script {
            services: Vec::new(),
            ..Script::default()
        })
        .await;
        let outcome = RoomTransport::default()
            .deliver(handle.as_mut(), &RoomTarget::new("builds@conference.example.com"), "x")
            .await;
        assert_eq!(outcome, DeliveryOutcome::RoomDiscoveryFailed);
        assert!(!handle.is_connected());
        assert_eq!(connector.log(), ["connect", "discover", "disconnect"]);
    }

    #[tokio::test]
    async fn discovery_timeout_fails() {
        let (connector, mut handle) = session(Script {
            fail_discovery: true,
            ..Script::default()
        })
        .await;
        let outcome = RoomTransport::default()
            .deliver(handle.as_mut(), &RoomTarget::new("builds@conference.example.com"), "x")
            .await;
        assert_eq!(outcome, DeliveryOutcome::RoomDiscoveryFailed);
        assert_eq!(connector.log(), ["connect", "discover", "disconnect"]);
    }

    #[tokio::test]
    async fn failed_join_does_not_leave() {
        let (connector, mut handle) = session(Script {
            fail_join: true,
            ..Script::default()
        })
        .await;
        let outcome = RoomTransport::default()
            .deliver(handle.as_mut(), &RoomTarget::new("builds@conference.example.com"), "x")
            .await;
        assert_eq!(outcome, DeliveryOutcome::JoinFailed);
        assert!(!handle.is_connected());
        let log = connector.log();
        assert!(log.iter().all(|e| !e.starts_with("send") && !e.starts_with("leave")));
        assert_eq!(log.last().map(String::as_str), Some("disconnect"));
    }

    #[tokio::test]
    async fn failed_send_still_leaves() {
        let (connector, mut handle) = session(Script {
            fail_send: true,
            ..Script::default()
        })
        .await;
        let outcome = RoomTransport::default()
            .deliver(handle.as_mut(), &RoomTarget::new("builds@conference.example.com"), "x")
            .await;
        assert_eq!(outcome, DeliveryOutcome::SendFailed);
        let log = connector.log();
        assert!(log[4].starts_with("leave "));
        assert_eq!(log[5], "disconnect");
    }

    #[tokio::test]
    async fn blank_password_joins_without_one() {
        let (connector, mut handle) = session(Script::default()).await;
        let target = RoomTarget {
            room_password: Some(Secret::new(String::new())),
            ..RoomTarget::new("builds@conference.example.com")
        };
        RoomTransport::default()
            .deliver(handle.as_mut(), &target, "x")
            .await;
        assert!(connector.log()[2].ends_with("password=-"));
    }
}
