//! Scripted in-memory sessions for unit tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    mucnotify_xmpp::{ConnectionConfig, Error, Jid, Result},
};

use crate::session::{ChatSession, Connector};

/// How the fake server behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub refuse_connect: bool,
    pub reject_auth: bool,
    pub fail_discovery: bool,
    pub services: Vec<&'static str>,
    pub fail_join: bool,
    pub fail_send: bool,
    /// The server drops the stream once the session has left a room. The
    /// session keeps reporting itself connected until it next touches the
    /// stream.
    pub close_when_idle: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            refuse_connect: false,
            reject_auth: false,
            fail_discovery: false,
            services: vec!["conference.example.com"],
            fail_join: false,
            fail_send: false,
            close_when_idle: false,
        }
    }
}

type Log = Arc<Mutex<Vec<String>>>;

pub struct FakeConnector {
    script: Script,
    log: Log,
    connects: AtomicUsize,
    plans: Mutex<Vec<ConnectionConfig>>,
}

impl FakeConnector {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            log: Log::default(),
            connects: AtomicUsize::new(0),
            plans: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn plans(&self) -> Vec<ConnectionConfig> {
        self.plans.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, plan: &ConnectionConfig) -> Result<Box<dyn ChatSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().unwrap().push(plan.clone());
        if self.script.refuse_connect {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        self.log.lock().unwrap().push("connect".into());
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            connected: true,
            closed_by_server: false,
        }))
    }
}

struct FakeSession {
    script: Script,
    log: Log,
    connected: bool,
    closed_by_server: bool,
}

impl FakeSession {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    /// Mirrors the real connection: reading a closed stream fails and marks
    /// the session disconnected.
    fn check_stream(&mut self) -> Result<()> {
        if self.closed_by_server {
            self.connected = false;
            return Err(Error::StreamClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn authenticate(&mut self, username: &str, _password: &str, resource: &str) -> Result<()> {
        self.record(format!("authenticate {username}/{resource}"));
        if self.script.reject_auth {
            return Err(Error::AuthFailed("not-authorized".into()));
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.record("ping".into());
        self.check_stream()
    }

    async fn muc_services(&mut self) -> Result<Vec<Jid>> {
        self.record("discover".into());
        self.check_stream()?;
        if self.script.fail_discovery {
            return Err(Error::NoResponse {
                operation: "disco#items",
                timeout: Duration::from_secs(30),
            });
        }
        self.script.services.iter().map(|s| Jid::parse(s)).collect()
    }

    async fn join_room(&mut self, room: &Jid, nickname: &str, password: Option<&str>) -> Result<Jid> {
        self.record(format!("join {room} as {nickname} password={}", password.unwrap_or("-")));
        if self.script.fail_join {
            return Err(Error::stanza("not-authorized"));
        }
        Ok(room.with_resource(nickname))
    }

    async fn send_groupchat(&mut self, room: &Jid, body: &str) -> Result<()> {
        self.record(format!("send {room}: {body}"));
        if self.script.fail_send {
            return Err(Error::stanza("forbidden"));
        }
        Ok(())
    }

    async fn leave_room(&mut self, occupant: &Jid) -> Result<()> {
        self.record(format!("leave {occupant}"));
        if self.script.close_when_idle {
            self.closed_by_server = true;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.record("disconnect".into());
        }
    }
}
