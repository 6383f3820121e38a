//! The room a notification goes to, and its stored forms.

use std::{collections::HashMap, fmt, sync::LazyLock};

use {
    mucnotify_config::substitute_vars,
    mucnotify_xmpp::Element,
    quick_xml::{Writer, events::BytesText},
    regex::Regex,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::error::ConfigError;

/// Root element of the stored XML form.
pub const XML_ROOT: &str = "muc-recipient";

/// Form parameter keys read by [`RoomTarget::from_params`].
pub const PARAM_ROOM: &str = "room";
pub const PARAM_PASSWORD: &str = "roompw";
pub const PARAM_NICKNAME: &str = "nickname";

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

#[allow(clippy::expect_used)]
static ROOM_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*@.*$").expect("room address pattern compiles"));

/// Check a room address before anything touches the network.
pub fn validate_room_address(address: &str) -> Result<(), ConfigError> {
    if address.trim().is_empty() {
        return Err(ConfigError::MissingRoom);
    }
    if !ROOM_ADDRESS.is_match(address) {
        return Err(ConfigError::MalformedRoomAddress(address.to_string()));
    }
    Ok(())
}

/// Room address plus the optional room password and preferred nickname.
///
/// Fields may hold `${name}` placeholders until [`substitute`](Self::substitute)
/// runs at dispatch time.
#[derive(Clone, Default)]
pub struct RoomTarget {
    pub room_address: String,
    pub room_password: Option<Secret<String>>,
    pub preferred_nickname: Option<String>,
}

impl RoomTarget {
    pub fn new(room_address: impl Into<String>) -> Self {
        Self {
            room_address: room_address.into(),
            ..Self::default()
        }
    }

    /// Blank passwords are treated as absent.
    pub fn with_password(mut self, password: Option<&str>) -> Self {
        self.room_password = non_blank(password).map(|p| Secret::new(p.to_string()));
        self
    }

    /// Blank nicknames are treated as absent.
    pub fn with_nickname(mut self, nickname: Option<&str>) -> Self {
        self.preferred_nickname = non_blank(nickname).map(|n| n.trim().to_string());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_room_address(&self.room_address)
    }

    pub fn password(&self) -> Option<&str> {
        self.room_password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .filter(|p| !p.is_empty())
    }

    pub fn nickname(&self) -> Option<&str> {
        self.preferred_nickname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// Resolve `${name}` placeholders in every field, from `vars` first and
    /// then the process environment.
    pub fn substitute(&self, vars: &HashMap<String, String>) -> Self {
        Self {
            room_address: substitute_vars(&self.room_address, vars).trim().to_string(),
            room_password: self
                .room_password
                .as_ref()
                .map(|p| Secret::new(substitute_vars(p.expose_secret(), vars))),
            preferred_nickname: self
                .preferred_nickname
                .as_deref()
                .map(|n| substitute_vars(n, vars)),
        }
    }

    /// Read the `room`, `roompw` and `nickname` form parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let get = |key: &str| params.get(key).map(String::as_str);
        Self::new(get(PARAM_ROOM).unwrap_or_default().trim())
            .with_password(get(PARAM_PASSWORD))
            .with_nickname(get(PARAM_NICKNAME))
    }

    /// Serialize as a pretty-printed `<muc-recipient>` element, no XML
    /// declaration.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let written = writer
            .create_element(XML_ROOT)
            .write_inner_content(|w| {
                w.create_element("room")
                    .write_text_content(BytesText::new(&self.room_address))?;
                w.create_element("roompw")
                    .write_text_content(BytesText::new(self.password().unwrap_or_default()))?;
                w.create_element("nickname")
                    .write_text_content(BytesText::new(self.nickname().unwrap_or_default()))?;
                Ok(())
            });
        if let Err(e) = written {
            debug!(error = %e, "failed to serialize room target");
        }
        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }

    /// Parse the XML form. Blank or malformed input yields an empty target;
    /// missing child elements leave their field unset.
    pub fn from_xml(input: &str) -> Self {
        if input.trim().is_empty() {
            return Self::default();
        }
        let root = match Element::parse(input) {
            Ok(root) => root,
            Err(e) => {
                debug!(error = %e, "unreadable room target XML, using an empty target");
                return Self::default();
            },
        };
        Self::new(root.child_text("room").unwrap_or_default())
            .with_password(root.child("roompw").map(|c| c.text.as_str()))
            .with_nickname(root.child_text("nickname"))
    }

    /// Serialize as `room|password|nickname`. `|` and `\` inside a value are
    /// escaped with a backslash.
    pub fn to_delimited(&self) -> String {
        [
            self.room_address.as_str(),
            self.password().unwrap_or_default(),
            self.nickname().unwrap_or_default(),
        ]
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
    }

    /// Parse the delimited form. Missing trailing fields are unset, extra
    /// fields are ignored.
    pub fn from_delimited(input: &str) -> Self {
        let mut fields = split_fields(input).into_iter();
        let room = fields.next().unwrap_or_default();
        let password = fields.next();
        let nickname = fields.next();
        Self::new(room.trim())
            .with_password(password.as_deref())
            .with_nickname(nickname.as_deref())
    }
}

impl fmt::Debug for RoomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomTarget")
            .field("room_address", &self.room_address)
            .field(
                "room_password",
                &self.room_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("preferred_nickname", &self.preferred_nickname)
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn split_fields(input: &str) -> Vec<String> {
    if input.is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.push(chars.next().unwrap_or(ESCAPE)),
            SEPARATOR => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
