//! Where the transport finds its server.

use std::path::PathBuf;

use {
    mucnotify_config::{MucNotifyConfig, discover_and_load, load_config},
    tracing::{debug, warn},
};

use crate::server::ServerDefinition;

/// Source of the one server notifications go through.
pub trait ServerDirectory: Send + Sync {
    /// The first registered server, or `None` when none is configured.
    /// Implementations must not cache: every call reflects the registry as
    /// it is now.
    fn current_server(&self) -> Option<ServerDefinition>;
}

/// Reads the server registry from the config file on every lookup, so edits
/// take effect on the next notification.
#[derive(Debug, Clone, Default)]
pub struct ConfigServerDirectory {
    path: Option<PathBuf>,
}

impl ConfigServerDirectory {
    /// Use config discovery (`./mucnotify.*`, then the user config dir).
    pub fn discover() -> Self {
        Self { path: None }
    }

    /// Always read this file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn load(&self) -> Option<MucNotifyConfig> {
        match &self.path {
            Some(path) => match load_config(path) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read server registry");
                    None
                },
            },
            None => Some(discover_and_load()),
        }
    }
}

impl ServerDirectory for ConfigServerDirectory {
    fn current_server(&self) -> Option<ServerDefinition> {
        let config = self.load()?;
        let entry = config.first_server()?;
        if entry.host.trim().is_empty() {
            warn!("first registered server has no host, treating as unconfigured");
            return None;
        }
        if config.servers.len() > 1 {
            debug!(
                registered = config.servers.len(),
                host = %entry.host,
                "several servers registered, using the first"
            );
        }
        Some(ServerDefinition::from(entry))
    }
}

/// A fixed server list held in memory, for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticServerDirectory {
    servers: Vec<ServerDefinition>,
}

impl StaticServerDirectory {
    pub fn new(servers: Vec<ServerDefinition>) -> Self {
        Self { servers }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl ServerDirectory for StaticServerDirectory {
    fn current_server(&self) -> Option<ServerDefinition> {
        self.servers.first().cloned()
    }
}
