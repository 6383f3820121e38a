//! Sessions backed by a real XMPP connection.

use {
    async_trait::async_trait,
    mucnotify_xmpp::{ConnectionConfig, Jid, Result, XmppConnection},
    tracing::debug,
};

use crate::session::{ChatSession, Connector};

/// Opens TCP/TLS XMPP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmppConnector;

#[async_trait]
impl Connector for XmppConnector {
    async fn connect(&self, plan: &ConnectionConfig) -> Result<Box<dyn ChatSession>> {
        let connection = XmppConnection::connect(plan.clone()).await?;
        debug!(
            host = %plan.host,
            secure = connection.is_secure(),
            "XMPP stream negotiated"
        );
        Ok(Box::new(connection))
    }
}

#[async_trait]
impl ChatSession for XmppConnection {
    fn is_connected(&self) -> bool {
        XmppConnection::is_connected(self)
    }

    async fn authenticate(&mut self, username: &str, password: &str, resource: &str) -> Result<()> {
        let jid = self.login(username, password, resource).await?;
        debug!(jid = %jid, "XMPP session bound");
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        XmppConnection::ping(self).await
    }

    async fn muc_services(&mut self) -> Result<Vec<Jid>> {
        XmppConnection::muc_services(self).await
    }

    async fn join_room(&mut self, room: &Jid, nickname: &str, password: Option<&str>) -> Result<Jid> {
        XmppConnection::join_room(self, room, nickname, password).await
    }

    async fn send_groupchat(&mut self, room: &Jid, body: &str) -> Result<()> {
        XmppConnection::send_groupchat(self, room, body).await
    }

    async fn leave_room(&mut self, occupant: &Jid) -> Result<()> {
        XmppConnection::leave_room(self, occupant).await
    }

    async fn disconnect(&mut self) {
        XmppConnection::disconnect(self).await
    }
}
