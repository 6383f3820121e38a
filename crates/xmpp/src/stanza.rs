//! Outbound stanza builders and stanza-error extraction.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    quick_xml::escape::escape,
};

use crate::{element::Element, error::Error, jid::Jid};

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_STREAMS: &str = "http://etherx.jabber.org/streams";
pub const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const NS_DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
pub const NS_DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const NS_MUC: &str = "http://jabber.org/protocol/muc";
pub const NS_MUC_USER: &str = "http://jabber.org/protocol/muc#user";
pub const NS_PING: &str = "urn:xmpp:ping";

pub fn stream_header(to: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xml:lang='en' \
         xmlns='{NS_CLIENT}' xmlns:stream='{NS_STREAMS}'>",
        escape(to)
    )
}

pub fn stream_close() -> &'static str {
    "</stream:stream>"
}

pub fn starttls() -> String {
    format!("<starttls xmlns='{NS_TLS}'/>")
}

/// SASL PLAIN (RFC 4616): `authzid NUL authcid NUL passwd`, authzid empty.
pub fn auth_plain(username: &str, password: &str) -> String {
    let payload = STANDARD.encode(format!("\0{username}\0{password}"));
    format!("<auth xmlns='{NS_SASL}' mechanism='PLAIN'>{payload}</auth>")
}

pub fn bind(id: &str, resource: &str) -> String {
    format!(
        "<iq type='set' id='{}'><bind xmlns='{NS_BIND}'><resource>{}</resource></bind></iq>",
        escape(id),
        escape(resource)
    )
}

pub fn session(id: &str) -> String {
    format!(
        "<iq type='set' id='{}'><session xmlns='{NS_SESSION}'/></iq>",
        escape(id)
    )
}

pub fn disco_items(id: &str, to: &Jid) -> String {
    disco_query(id, to, NS_DISCO_ITEMS)
}

pub fn disco_info(id: &str, to: &Jid) -> String {
    disco_query(id, to, NS_DISCO_INFO)
}

fn disco_query(id: &str, to: &Jid, ns: &str) -> String {
    format!(
        "<iq type='get' id='{}' to='{}'><query xmlns='{ns}'/></iq>",
        escape(id),
        escape(&to.to_string())
    )
}

pub fn ping(id: &str, to: &Jid) -> String {
    format!(
        "<iq type='get' id='{}' to='{}'><ping xmlns='{NS_PING}'/></iq>",
        escape(id),
        escape(&to.to_string())
    )
}

/// Directed presence that enters a room as `occupant` (room@service/nick).
/// Room history is suppressed: the session only posts.
pub fn muc_join(occupant: &Jid, password: Option<&str>) -> String {
    let password = password
        .map(|p| format!("<password>{}</password>", escape(p)))
        .unwrap_or_default();
    format!(
        "<presence to='{}'><x xmlns='{NS_MUC}'><history maxstanzas='0'/>{password}</x></presence>",
        escape(&occupant.to_string())
    )
}

pub fn muc_leave(occupant: &Jid) -> String {
    format!(
        "<presence to='{}' type='unavailable'/>",
        escape(&occupant.to_string())
    )
}

pub fn groupchat(id: &str, room: &Jid, body: &str) -> String {
    format!(
        "<message to='{}' type='groupchat' id='{}'><body>{}</body></message>",
        escape(&room.to_string()),
        escape(id),
        escape(body)
    )
}

/// Extract the defined condition from a `type='error'` stanza.
pub fn stanza_error(stanza: &Element) -> Option<Error> {
    if stanza.attr("type") != Some("error") {
        return None;
    }
    let Some(error) = stanza.child("error") else {
        return Some(Error::stanza("undefined-condition"));
    };
    let condition = error
        .children
        .iter()
        .find(|c| c.ns() == Some(NS_STANZAS) && c.name != "text")
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "undefined-condition".into());
    let text = error
        .child("text")
        .map(|t| t.text.trim().to_string())
        .filter(|t| !t.is_empty());
    Some(Error::Stanza { condition, text })
}
