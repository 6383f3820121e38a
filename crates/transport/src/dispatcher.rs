//! Entry point for hosts: one call per build event.

use std::{collections::HashMap, sync::Arc};

use {
    mucnotify_config::{DeliveryConfig, MucNotifyConfig},
    tokio::sync::Mutex,
    tracing::{error, info, warn},
};

use crate::{
    directory::ServerDirectory,
    outcome::DeliveryOutcome,
    recipient::RoomTarget,
    room::RoomTransport,
    session::{Connector, SessionManager, TransportSettings},
};

/// Resolves the server, drives the session slot and the room visit, and
/// turns every failure into a logged [`DeliveryOutcome`].
///
/// Concurrent `notify` calls on one dispatcher run one after another: the
/// session slot stays locked from acquire through release.
pub struct NotificationDispatcher {
    directory: Arc<dyn ServerDirectory>,
    sessions: Mutex<SessionManager>,
    rooms: RoomTransport,
    variables: HashMap<String, String>,
    session_reuse: bool,
}

impl NotificationDispatcher {
    pub fn new(
        directory: Arc<dyn ServerDirectory>,
        connector: Arc<dyn Connector>,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            directory,
            sessions: Mutex::new(SessionManager::new(
                connector,
                TransportSettings::from(delivery),
            )),
            rooms: RoomTransport::new(delivery.default_nickname.clone(), delivery.session_reuse),
            variables: HashMap::new(),
            session_reuse: delivery.session_reuse,
        }
    }

    /// Delivery policy and `[variables]` from a loaded config.
    pub fn from_config(
        config: &MucNotifyConfig,
        directory: Arc<dyn ServerDirectory>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::new(directory, connector, &config.delivery).with_variables(config.variables.clone())
    }

    /// Values for `${name}` placeholders in room targets. Later entries
    /// override earlier ones.
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub async fn notify(&self, target: &RoomTarget, message: &str) -> DeliveryOutcome {
        let Some(server) = self.directory.current_server() else {
            warn!(room = %target.room_address, "no XMPP server configured, notification skipped");
            return DeliveryOutcome::NoServerConfigured;
        };

        let target = target.substitute(&self.variables);
        if let Err(e) = target.validate() {
            error!(room = %target.room_address, error = %e, "invalid room target");
            return DeliveryOutcome::InvalidTarget;
        }

        let mut sessions = self.sessions.lock().await;
        let session = match sessions.acquire(&server).await {
            Ok(session) => session,
            Err(e) => {
                error!(host = %server.host(), room = %target.room_address, error = %e, "could not open XMPP session");
                return e.outcome();
            },
        };

        let outcome = self.rooms.deliver(session.chat(), &target, message).await;
        if !self.session_reuse {
            sessions.release().await;
        }

        match outcome {
            DeliveryOutcome::Delivered => {
                info!(host = %server.host(), room = %target.room_address, "notification sent")
            },
            other => {
                error!(host = %server.host(), room = %target.room_address, outcome = %other, "notification failed")
            },
        }
        outcome
    }
}
