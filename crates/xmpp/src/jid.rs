use std::fmt;

use crate::error::{Error, Result};

/// An XMPP address: `[local@]domain[/resource]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (rest, resource) = match input.split_once('/') {
            Some((rest, res)) if !res.is_empty() => (rest, Some(res.to_string())),
            Some(_) => return Err(Error::InvalidJid(input.into())),
            None => (input, None),
        };
        let (local, domain) = match rest.split_once('@') {
            Some((local, _)) if local.is_empty() => return Err(Error::InvalidJid(input.into())),
            Some((local, domain)) => (Some(local.to_lowercase()), domain),
            None => (None, rest),
        };
        if domain.is_empty() || domain.contains('@') {
            return Err(Error::InvalidJid(input.into()));
        }
        Ok(Self {
            local,
            domain: domain.to_ascii_lowercase(),
            resource,
        })
    }

    /// A domain-only address, e.g. a server or a chat service.
    pub fn domain_only(domain: &str) -> Result<Self> {
        Self::parse(domain).and_then(|jid| {
            if jid.local.is_some() || jid.resource.is_some() {
                Err(Error::InvalidJid(domain.into()))
            } else {
                Ok(jid)
            }
        })
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The address without its resource.
    pub fn bare(&self) -> Self {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Same address with `resource` attached, e.g. a room occupant.
    pub fn with_resource(&self, resource: &str) -> Self {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.to_string()),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{local}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
