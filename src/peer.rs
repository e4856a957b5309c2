use crate::error::{Error, Result};
use crate::runtime::AppEvent;
use crate::session::SessionState;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

const COEFFICIENT_KEY: &str = "coefficient";
const PULL_KEY: &str = "watch";
const PULL_VALUE: &str = "coef";
const MAX_DATAGRAM: usize = 2048;

/// Which side of the pairing this instance plays
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Owns the coefficient and publishes it
    Primary,
    /// Mirrors the primary's coefficient, pulling it on connect
    Secondary,
}

/// Free-form key/value message exchanged between paired devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerMessage(Map<String, Value>);

impl PeerMessage {
    pub fn coefficient(value: f64) -> Self {
        let mut map = Map::new();
        map.insert(COEFFICIENT_KEY.to_string(), Value::from(value));
        Self(map)
    }

    pub fn pull_request() -> Self {
        let mut map = Map::new();
        map.insert(PULL_KEY.to_string(), Value::from(PULL_VALUE));
        Self(map)
    }

    pub fn coefficient_value(&self) -> Option<f64> {
        self.0.get(COEFFICIENT_KEY).and_then(Value::as_f64)
    }

    pub fn is_pull_request(&self) -> bool {
        self.0.get(PULL_KEY).and_then(Value::as_str) == Some(PULL_VALUE)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Best-effort channel to the paired device
pub trait PeerLink: Send {
    fn is_established(&self) -> bool;
    fn send(&self, message: &PeerMessage) -> Result<()>;
}

/// JSON datagrams over a connected UDP socket
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpLink {
    pub fn connect(bind: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        info!("peer link {} -> {peer}", socket.local_addr()?);
        Ok(Self { socket, peer })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Decodes incoming datagrams on a background thread and queues them
    /// onto the app's event channel, so state is only touched by the loop.
    pub fn spawn_reader(&self, tx: Sender<AppEvent>) -> Result<JoinHandle<()>> {
        let socket = self.socket.try_clone()?;
        let peer = self.peer;
        let handle = thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                match socket.recv(&mut buf) {
                    Ok(n) => match PeerMessage::decode(&buf[..n]) {
                        Ok(message) => {
                            if tx.send(AppEvent::Peer(message)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed datagram from {peer}: {e}"),
                    },
                    // a previous send hit a closed port on the peer
                    Err(e) if e.kind() == ErrorKind::ConnectionRefused => continue,
                    Err(e) => {
                        warn!("peer reader stopped: {e}");
                        break;
                    }
                }
            }
        });
        Ok(handle)
    }
}

impl PeerLink for UdpLink {
    fn is_established(&self) -> bool {
        true
    }

    fn send(&self, message: &PeerMessage) -> Result<()> {
        self.socket.send(&message.encode()?)?;
        Ok(())
    }
}

/// In-process link; the paired receiver is the peer's inbox
#[derive(Debug)]
pub struct ChannelLink {
    tx: Sender<PeerMessage>,
    established: AtomicBool,
}

impl ChannelLink {
    pub fn channel() -> (Self, Receiver<PeerMessage>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                tx,
                established: AtomicBool::new(true),
            },
            rx,
        )
    }

    pub fn set_established(&self, established: bool) {
        self.established.store(established, Ordering::Relaxed);
    }
}

impl PeerLink for ChannelLink {
    fn is_established(&self) -> bool {
        self.established.load(Ordering::Relaxed)
    }

    fn send(&self, message: &PeerMessage) -> Result<()> {
        self.tx.send(message.clone()).map_err(|_| {
            self.set_established(false);
            Error::Io(std::io::Error::new(
                ErrorKind::NotConnected,
                "peer inbox closed",
            ))
        })
    }
}

/// What handling a peer message changed locally
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    Ignored,
    /// A pull request was answered with our coefficient
    Answered,
    /// The peer's coefficient replaced ours and was persisted
    CoefficientApplied(f64),
}

/// Coefficient propagation between the two roles. Sends are fire-and-forget.
pub struct PeerSync {
    role: Role,
    link: Option<Box<dyn PeerLink>>,
}

impl std::fmt::Debug for PeerSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSync")
            .field("role", &self.role)
            .field("linked", &self.link.is_some())
            .finish()
    }
}

impl PeerSync {
    pub fn new(role: Role, link: impl PeerLink + 'static) -> Self {
        Self {
            role,
            link: Some(Box::new(link)),
        }
    }

    pub fn offline(role: Role) -> Self {
        Self { role, link: None }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_linked(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.is_established())
    }

    fn send(&self, message: PeerMessage) {
        match &self.link {
            Some(link) if link.is_established() => {
                if let Err(e) = link.send(&message) {
                    debug!("peer unreachable, dropped {message:?}: {e}");
                }
            }
            _ => debug!("no peer link, dropped {message:?}"),
        }
    }

    pub fn publish_coefficient(&self, value: f64) {
        self.send(PeerMessage::coefficient(value));
    }

    pub fn request_coefficient(&self) {
        self.send(PeerMessage::pull_request());
    }

    pub fn on_link_established(&self, session: &SessionState) {
        match self.role {
            Role::Primary => self.publish_coefficient(session.parameters().coefficient),
            Role::Secondary => self.request_coefficient(),
        }
    }

    pub fn on_pull_request(&self, session: &SessionState) -> SyncOutcome {
        if self.role != Role::Primary {
            debug!("secondary ignores pull request");
            return SyncOutcome::Ignored;
        }
        self.publish_coefficient(session.parameters().coefficient);
        SyncOutcome::Answered
    }

    pub fn on_coefficient_received(&self, value: f64, session: &mut SessionState) -> SyncOutcome {
        if self.role != Role::Secondary {
            debug!("primary ignores pushed coefficient {value}");
            return SyncOutcome::Ignored;
        }
        match session.update_coefficient(value) {
            Ok(()) => {
                info!("coefficient {value} received from peer");
                SyncOutcome::CoefficientApplied(value)
            }
            Err(e) => {
                warn!("rejected coefficient from peer: {e}");
                SyncOutcome::Ignored
            }
        }
    }

    pub fn handle(&self, message: &PeerMessage, session: &mut SessionState) -> SyncOutcome {
        if message.is_pull_request() {
            return self.on_pull_request(session);
        }
        if let Some(value) = message.coefficient_value() {
            return self.on_coefficient_received(value, session);
        }
        debug!("unrecognised peer message {message:?}");
        SyncOutcome::Ignored
    }
}
