use std::{
    collections::VecDeque,
    future::Future,
    io,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    net::{TcpStream, lookup_host},
    time::timeout,
};

/// Why a probe did not reach its target. The message is stored as the
/// outage cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection timed out")]
    Timeout,
    #[error("DNS lookup failed")]
    DnsFailure,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("socket error: {0}")]
    Socket(String),
    #[error("simulated outage")]
    Simulated,
}

pub type ProbeResult = Result<(), ProbeError>;

/// Where and how long to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// A single reachability check.
pub trait Probe {
    fn check(&self, target: &Target) -> impl Future<Output = ProbeResult> + Send;
}

/// Opens (and immediately drops) a TCP connection to the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl Probe for TcpProbe {
    async fn check(&self, target: &Target) -> ProbeResult {
        match timeout(target.timeout, connect(target)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

async fn connect(target: &Target) -> ProbeResult {
    let addrs: Vec<SocketAddr> = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|_| ProbeError::DnsFailure)?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::DnsFailure);
    }

    TcpStream::connect(addrs.as_slice())
        .await
        .map(drop)
        .map_err(classify)
}

fn classify(err: io::Error) -> ProbeError {
    match err.kind() {
        io::ErrorKind::TimedOut => ProbeError::Timeout,
        io::ErrorKind::HostUnreachable => ProbeError::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => ProbeError::NetworkUnreachable,
        io::ErrorKind::ConnectionRefused => ProbeError::ConnectionRefused,
        _ => ProbeError::Socket(err.to_string()),
    }
}

/// Debug stand-in that never touches the network.
#[derive(Debug, Clone, Copy)]
pub struct RandomProbe {
    online_probability: f64,
}

impl RandomProbe {
    pub fn new(online_probability: f64) -> Self {
        Self {
            online_probability: online_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for RandomProbe {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl Probe for RandomProbe {
    async fn check(&self, _target: &Target) -> ProbeResult {
        if rand::random_bool(self.online_probability) {
            Ok(())
        } else {
            Err(ProbeError::Simulated)
        }
    }
}

/// Replays a fixed sequence of results, then keeps repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeResult>>,
    last: Mutex<Option<ProbeResult>>,
}

impl ScriptedProbe {
    pub fn new<I: IntoIterator<Item = ProbeResult>>(results: I) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    fn next(&self) -> ProbeResult {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last.clone().unwrap_or(Ok(())),
        }
    }
}

impl Probe for ScriptedProbe {
    async fn check(&self, _target: &Target) -> ProbeResult {
        self.next()
    }
}

/// The probe chosen at startup: the real one, or the `--debug` stub.
#[derive(Debug, Clone, Copy)]
pub enum ProbeKind {
    Tcp(TcpProbe),
    Random(RandomProbe),
}

impl ProbeKind {
    pub fn select(debug: bool) -> Self {
        if debug {
            Self::Random(RandomProbe::default())
        } else {
            Self::Tcp(TcpProbe)
        }
    }
}

impl Probe for ProbeKind {
    async fn check(&self, target: &Target) -> ProbeResult {
        match self {
            Self::Tcp(probe) => probe.check(target).await,
            Self::Random(probe) => probe.check(target).await,
        }
    }
}
