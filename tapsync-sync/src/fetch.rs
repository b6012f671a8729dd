//! Artifact download.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Mutex;
use std::time::Duration;

pub type ArtifactBody = Box<dyn Read + Send + Sync + 'static>;

pub trait ArtifactFetcher: Send + Sync {
    /// Open the body of `url` for streaming.
    fn open(&self, url: &str) -> io::Result<ArtifactBody>;
}

/// HTTP(S) fetcher backed by a shared `ureq::Agent`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tapsync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn open(&self, url: &str) -> io::Result<ArtifactBody> {
        tracing::debug!("download {url}");
        match self.agent.get(url).call() {
            Ok(response) => Ok(response.into_reader()),
            Err(ureq::Error::Status(code, _)) => {
                Err(io::Error::other(format!("HTTP {code} from {url}")))
            }
            Err(ureq::Error::Transport(t)) => Err(io::Error::other(t.to_string())),
        }
    }
}

/// Serves fixed bodies by URL and records every request.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bodies: BTreeMap<String, Vec<u8>>,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// URLs opened so far, in request order.
    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ArtifactFetcher for StaticFetcher {
    fn open(&self, url: &str) -> io::Result<ArtifactBody> {
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        match self.bodies.get(url) {
            Some(body) => Ok(Box::new(io::Cursor::new(body.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("HTTP 404 from {url}"),
            )),
        }
    }
}
