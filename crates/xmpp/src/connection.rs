//! Client-to-server XMPP connection: TCP, TLS negotiation, SASL PLAIN,
//! resource binding, service discovery and multi-user chat primitives.

use std::{future::Future, time::Duration};

use {
    tokio::net::TcpStream,
    tokio_rustls::TlsConnector,
    tracing::{debug, info, trace, warn},
};

use crate::{
    element::Element,
    error::{Error, Result},
    jid::Jid,
    stanza::{self, NS_DISCO_INFO, NS_DISCO_ITEMS, NS_MUC, NS_MUC_USER, NS_SASL, NS_SESSION, NS_TLS},
    stream::{BoxedIo, XmlStream},
    tls::{self, TrustPolicy},
};

/// Whether transport encryption is optional or mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Upgrade with STARTTLS when offered.
    Optional,
    /// Fail unless the stream is encrypted.
    Required,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host to open the TCP connection to.
    pub host: String,
    pub port: u16,
    /// XMPP domain announced in the stream header and verified in the
    /// server certificate.
    pub service_name: String,
    pub security: SecurityMode,
    /// TLS from the first byte (legacy SSL) instead of STARTTLS.
    pub direct_tls: bool,
    pub trust: TrustPolicy,
    pub connect_timeout: Duration,
    /// Bound for each request/response exchange after the TCP connect.
    pub request_timeout: Duration,
}

/// Result of a `disco#info` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfo {
    /// `(category, type)` pairs.
    pub identities: Vec<(String, String)>,
    pub features: Vec<String>,
}

impl DiscoInfo {
    /// True for entities hosting multi-user chat rooms.
    pub fn is_muc_service(&self) -> bool {
        self.features.iter().any(|f| f == NS_MUC)
            || self
                .identities
                .iter()
                .any(|(category, kind)| category == "conference" && kind == "text")
    }
}

/// A single XMPP client session.
///
/// No initial presence is ever broadcast: the session exists to post into
/// rooms, and an available presence would attract roster and chat traffic.
pub struct XmppConnection {
    stream: Option<XmlStream>,
    config: ConnectionConfig,
    features: Element,
    secure: bool,
    next_id: u64,
}

impl XmppConnection {
    /// Open the TCP connection and negotiate transport security.
    ///
    /// The returned connection is not yet authenticated; call [`login`](Self::login).
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        debug!(
            host = %config.host,
            port = config.port,
            service = %config.service_name,
            security = ?config.security,
            direct_tls = config.direct_tls,
            "opening XMPP connection"
        );
        let tcp = within(config.connect_timeout, "connect", async {
            TcpStream::connect((config.host.as_str(), config.port))
                .await
                .map_err(Error::from)
        })
        .await?;
        tcp.set_nodelay(true)?;

        let mut io: BoxedIo = Box::new(tcp);
        let mut secure = false;
        if config.direct_tls {
            io = wrap_tls(io, &config).await?;
            secure = true;
        }

        let mut stream = XmlStream::new(io);
        let mut features = open_stream(&mut stream, &config).await?;

        if !secure {
            let offers_starttls = features
                .child("starttls")
                .is_some_and(|s| s.ns() == Some(NS_TLS));
            match (config.security, offers_starttls) {
                (_, true) => {
                    stream.send(&stanza::starttls()).await?;
                    let reply = within(config.request_timeout, "starttls", stream.read_element())
                        .await?;
                    if !reply.is("proceed", NS_TLS) {
                        return Err(Error::Tls(format!("server answered starttls with {}", reply.name)));
                    }
                    stream = XmlStream::new(wrap_tls(stream.into_io(), &config).await?);
                    secure = true;
                    features = open_stream(&mut stream, &config).await?;
                },
                (SecurityMode::Required, false) => return Err(Error::TlsRequired),
                (SecurityMode::Optional, false) => {
                    warn!(host = %config.host, "server does not offer STARTTLS, continuing unencrypted");
                },
            }
        }

        Ok(Self {
            stream: Some(stream),
            config,
            features,
            secure,
            next_id: 0,
        })
    }

    /// Authenticate with SASL PLAIN and bind `resource`.
    ///
    /// On failure the stream is closed; the connection is left unusable
    /// rather than half-open.
    pub async fn login(&mut self, username: &str, password: &str, resource: &str) -> Result<Jid> {
        let mut stream = self.stream.take().ok_or(Error::NotConnected)?;

        let mechanisms: Vec<String> = self
            .features
            .child("mechanisms")
            .filter(|m| m.ns() == Some(NS_SASL))
            .map(|m| {
                m.children_named("mechanism")
                    .map(|c| c.text.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        if !mechanisms.iter().any(|m| m == "PLAIN") {
            return Err(self.abandon(stream, Error::NoMechanism(mechanisms.join(", "))).await);
        }
        if !self.secure {
            warn!(host = %self.config.host, "sending credentials over an unencrypted stream");
        }

        if let Err(e) = sasl_plain(&mut stream, self.config.request_timeout, username, password).await {
            return Err(self.abandon(stream, e).await);
        }

        let mut stream = stream.restart();
        let (bind_id, session_id) = (self.next_id(), self.next_id());
        let (features, jid) =
            match bind_resource(&mut stream, &self.config, resource, &bind_id, &session_id).await {
                Ok(bound) => bound,
                Err(e) => return Err(self.abandon(stream, e).await),
            };

        info!(jid = %jid, "XMPP session established");
        self.stream = Some(stream);
        self.features = features;
        Ok(jid)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub async fn disco_items(&mut self, to: &Jid) -> Result<Vec<Jid>> {
        let reply = self
            .request("service discovery", |id| stanza::disco_items(id, to))
            .await?;
        let items = reply
            .child("query")
            .filter(|q| q.ns() == Some(NS_DISCO_ITEMS))
            .map(|q| {
                q.children_named("item")
                    .filter_map(|i| i.attr("jid"))
                    .filter_map(|j| Jid::parse(j).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    pub async fn disco_info(&mut self, to: &Jid) -> Result<DiscoInfo> {
        let reply = self
            .request("service discovery", |id| stanza::disco_info(id, to))
            .await?;
        let Some(query) = reply.child("query").filter(|q| q.ns() == Some(NS_DISCO_INFO)) else {
            return Ok(DiscoInfo::default());
        };
        Ok(DiscoInfo {
            identities: query
                .children_named("identity")
                .map(|i| {
                    (
                        i.attr("category").unwrap_or_default().to_string(),
                        i.attr("type").unwrap_or_default().to_string(),
                    )
                })
                .collect(),
            features: query
                .children_named("feature")
                .filter_map(|f| f.attr("var"))
                .map(str::to_string)
                .collect(),
        })
    }

    /// Chat-room services advertised by the server: `disco#items` on the
    /// service domain, then `disco#info` on each item.
    pub async fn muc_services(&mut self) -> Result<Vec<Jid>> {
        let server = Jid::domain_only(&self.config.service_name)?;
        let items = self.disco_items(&server).await?;
        let mut services = Vec::new();
        for item in items {
            match self.disco_info(&item).await {
                Ok(info) if info.is_muc_service() => services.push(item),
                Ok(_) => {},
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(item = %item, error = %e, "disco#info failed, skipping item"),
            }
        }
        debug!(count = services.len(), "discovered chat services");
        Ok(services)
    }

    /// Enter `room` (a bare room JID) as `nickname`. Resolves once the room
    /// reflects our own presence; an error presence fails the join.
    pub async fn join_room(
        &mut self,
        room: &Jid,
        nickname: &str,
        password: Option<&str>,
    ) -> Result<Jid> {
        let occupant = room.with_resource(nickname);
        let limit = self.config.request_timeout;
        let result = match self.stream.as_mut() {
            Some(stream) => {
                let sent = stream.send(&stanza::muc_join(&occupant, password)).await;
                match sent {
                    Ok(()) => within(limit, "room join", await_self_presence(stream, &occupant)).await,
                    Err(e) => Err(e),
                }
            },
            None => Err(Error::NotConnected),
        };
        self.track(result).map(|()| occupant)
    }

    pub async fn send_groupchat(&mut self, room: &Jid, body: &str) -> Result<()> {
        let id = self.next_id();
        self.send(&stanza::groupchat(&id, room, body)).await
    }

    pub async fn leave_room(&mut self, occupant: &Jid) -> Result<()> {
        self.send(&stanza::muc_leave(occupant)).await
    }

    /// XEP-0199 ping to the service domain, bounded by the request timeout.
    /// An error reply still proves the stream is alive; only a dead stream
    /// fails, and it leaves the connection disconnected.
    pub async fn ping(&mut self) -> Result<()> {
        let server = Jid::domain_only(&self.config.service_name)?;
        match self.request("ping", |id| stanza::ping(id, &server)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(host = %self.config.host, error = %e, "ping answered with an error");
                Ok(())
            },
        }
    }

    /// Close the stream. Idempotent; errors while closing are only logged.
    pub async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let closed = within(self.config.request_timeout, "disconnect", async {
            stream.send(stanza::stream_close()).await?;
            stream.shutdown().await
        })
        .await;
        match closed {
            Ok(()) => debug!(host = %self.config.host, "XMPP connection closed"),
            Err(e) => debug!(host = %self.config.host, error = %e, "error while closing XMPP connection"),
        }
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("mn{}", self.next_id)
    }

    async fn send(&mut self, xml: &str) -> Result<()> {
        let limit = self.config.request_timeout;
        let result = match self.stream.as_mut() {
            Some(stream) => within(limit, "send", stream.send(xml)).await,
            None => Err(Error::NotConnected),
        };
        self.track(result)
    }

    /// Send an IQ built from a fresh id and wait for its result.
    async fn request(
        &mut self,
        operation: &'static str,
        build: impl FnOnce(&str) -> String,
    ) -> Result<Element> {
        let id = self.next_id();
        let limit = self.config.request_timeout;
        let result = match self.stream.as_mut() {
            Some(stream) => match stream.send(&build(&id)).await {
                Ok(()) => within(limit, operation, await_iq(stream, &id)).await,
                Err(e) => Err(e),
            },
            None => Err(Error::NotConnected),
        };
        self.track(result)
    }

    /// Close a stream that failed during login, then hand back the error.
    async fn abandon(&mut self, stream: XmlStream, error: Error) -> Error {
        self.stream = Some(stream);
        self.disconnect().await;
        error
    }

    /// Drop the stream after errors that leave it in an unknown state.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            warn!(host = %self.config.host, error = %e, "XMPP connection lost");
            self.stream = None;
        }
        result
    }
}

async fn sasl_plain(
    stream: &mut XmlStream,
    limit: Duration,
    username: &str,
    password: &str,
) -> Result<()> {
    stream.send(&stanza::auth_plain(username, password)).await?;
    let reply = within(limit, "authentication", stream.read_element()).await?;
    match reply.name.as_str() {
        "success" => Ok(()),
        "failure" => {
            let condition = reply
                .children
                .iter()
                .find(|c| c.name != "text")
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "not-authorized".into());
            Err(Error::AuthFailed(condition))
        },
        other => Err(Error::Unexpected {
            expected: "SASL result",
            got: other.to_string(),
        }),
    }
}

/// Reopen the stream after SASL success, bind `resource` and establish the
/// session when the server still requires it.
async fn bind_resource(
    stream: &mut XmlStream,
    config: &ConnectionConfig,
    resource: &str,
    bind_id: &str,
    session_id: &str,
) -> Result<(Element, Jid)> {
    let limit = config.request_timeout;
    let features = open_stream(stream, config).await?;

    stream.send(&stanza::bind(bind_id, resource)).await?;
    let bound = within(limit, "resource binding", await_iq(stream, bind_id))
        .await
        .map_err(|e| match e {
            Error::Stanza { .. } => Error::Bind(e.to_string()),
            other => other,
        })?;
    let jid = bound
        .child("bind")
        .and_then(|b| b.child_text("jid"))
        .ok_or_else(|| Error::Bind("server returned no jid".into()))
        .and_then(Jid::parse)?;

    let session_required = features
        .child("session")
        .filter(|s| s.ns() == Some(NS_SESSION))
        .is_some_and(|s| !s.has_child("optional"));
    if session_required {
        stream.send(&stanza::session(session_id)).await?;
        within(limit, "session establishment", await_iq(stream, session_id)).await?;
    }

    Ok((features, jid))
}

async fn open_stream(stream: &mut XmlStream, config: &ConnectionConfig) -> Result<Element> {
    stream.send(&stanza::stream_header(&config.service_name)).await?;
    within(config.request_timeout, "stream header", stream.read_header()).await?;
    let features = within(config.request_timeout, "stream features", stream.read_element()).await?;
    if features.name != "features" {
        return Err(Error::Unexpected {
            expected: "stream features",
            got: features.name,
        });
    }
    Ok(features)
}

async fn wrap_tls(io: BoxedIo, config: &ConnectionConfig) -> Result<BoxedIo> {
    let connector = TlsConnector::from(tls::client_config(&config.trust)?);
    let name = tls::server_name(&config.service_name)?;
    let tls = within(config.request_timeout, "tls handshake", async {
        connector
            .connect(name, io)
            .await
            .map_err(|e| Error::Tls(e.to_string()))
    })
    .await?;
    debug!(service = %config.service_name, "TLS established");
    Ok(Box::new(tls))
}

/// Wait for the IQ answering `id`. Unrelated stanzas are dropped.
async fn await_iq(stream: &mut XmlStream, id: &str) -> Result<Element> {
    loop {
        let el = stream.read_element().await?;
        if el.name != "iq" || el.attr("id") != Some(id) {
            trace!(name = %el.name, "ignoring stanza while awaiting iq");
            continue;
        }
        if let Some(e) = stanza::stanza_error(&el) {
            return Err(e);
        }
        return Ok(el);
    }
}

/// Wait for the room to reflect our own presence (status 110 or our own
/// occupant address). Presence of other occupants and room history are
/// skipped.
async fn await_self_presence(stream: &mut XmlStream, occupant: &Jid) -> Result<()> {
    let room = occupant.bare();
    loop {
        let el = stream.read_element().await?;
        if el.name != "presence" {
            trace!(name = %el.name, "ignoring stanza while joining room");
            continue;
        }
        let Some(from) = el.attr("from").and_then(|f| Jid::parse(f).ok()) else {
            continue;
        };
        if from.bare() != room {
            continue;
        }
        if let Some(e) = stanza::stanza_error(&el) {
            return Err(e);
        }
        let self_presence = el
            .children_named("x")
            .filter(|x| x.ns() == Some(NS_MUC_USER))
            .flat_map(|x| x.children_named("status"))
            .any(|s| s.attr("code") == Some("110"));
        if self_presence || from == *occupant {
            return Ok(());
        }
    }
}

async fn within<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::NoResponse {
            operation,
            timeout: limit,
        })?
}
