//! Posts build and deployment notifications into XMPP multi-user chat rooms.
//!
//! A [`NotificationDispatcher`] looks up the configured server through a
//! [`ServerDirectory`], obtains a session from its [`SessionManager`] and
//! hands it to a [`RoomTransport`] for one join, send and leave. Every call
//! ends in a [`DeliveryOutcome`].

pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod recipient;
pub mod room;
pub mod server;
pub mod session;
pub mod xmpp_session;

#[cfg(test)]
mod testing;

pub use {
    directory::{ConfigServerDirectory, ServerDirectory, StaticServerDirectory},
    dispatcher::NotificationDispatcher,
    error::{ConfigError, SessionError},
    outcome::DeliveryOutcome,
    recipient::{RoomTarget, validate_room_address},
    room::{RoomTransport, unique_nickname},
    server::{DEFAULT_RESOURCE, ServerDefinition},
    session::{ChatSession, Connector, Session, SessionManager, TransportSettings, transport_plan},
    xmpp_session::XmppConnector,
};
