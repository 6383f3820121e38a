//! Minimal XMPP client for posting into multi-user chat rooms.
//!
//! Covers exactly what a notifier needs: TCP with STARTTLS or direct TLS,
//! SASL PLAIN, resource binding, service discovery, ping, and MUC
//! join / groupchat message / leave.

pub mod connection;
pub mod element;
pub mod error;
pub mod jid;
pub mod stanza;
pub mod stream;
pub mod tls;

pub use {
    connection::{ConnectionConfig, DiscoInfo, SecurityMode, XmppConnection},
    element::Element,
    error::{Error, Result},
    jid::Jid,
    tls::TrustPolicy,
};
