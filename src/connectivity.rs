//! Network reachability, decided by a lightweight probe and then remembered.
//!
//! The cache consults this on reads to decide whether stale entries should be
//! refreshed. A known answer is reused until the recheck cooldown elapses
//! (or forever, when no cooldown is set), and [`Connectivity::refresh`] forces
//! a new probe.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;

use crate::fetch::{FetchRequest, SecureFetch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Unknown,
    Online,
    Offline,
}

impl ConnectivityState {
    fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        })
    }
}

pub trait Connectivity: Send + Sync {
    /// Current answer, probing first if none is known or it has gone stale.
    fn is_online(&self) -> bool;

    /// Discard the remembered answer and probe again.
    fn refresh(&self) -> bool;

    /// Last known state without probing.
    fn state(&self) -> ConnectivityState;
}

struct ProbeState {
    state: ConnectivityState,
    checked_at: Option<Instant>,
}

/// Probes with a `HEAD` request; any response counts as online, any error
/// or timeout as offline.
pub struct Prober {
    fetch: Arc<SecureFetch>,
    url: String,
    timeout: Duration,
    recheck: Option<Duration>,
    inner: Mutex<ProbeState>,
}

impl Prober {
    pub fn new(fetch: Arc<SecureFetch>, url: &str, timeout: Duration, recheck: Option<Duration>) -> Self {
        Prober {
            fetch,
            url: url.to_string(),
            timeout,
            recheck,
            inner: Mutex::new(ProbeState {
                state: ConnectivityState::Unknown,
                checked_at: None,
            }),
        }
    }

    fn probe(&self, inner: &mut ProbeState) -> bool {
        let request = FetchRequest::head(&self.url).timeout(self.timeout);
        let online = match self.fetch.fetch(&request) {
            Ok(response) => {
                debug!("Connectivity probe answered with HTTP {}", response.status());
                true
            }
            Err(e) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
        };

        let state = ConnectivityState::from_online(online);
        if inner.state != state {
            info!("Network is {}", state);
        }
        inner.state = state;
        inner.checked_at = Some(Instant::now());
        online
    }

    fn is_fresh(&self, inner: &ProbeState) -> bool {
        match (inner.state, inner.checked_at, self.recheck) {
            (ConnectivityState::Unknown, _, _) => false,
            (_, _, None) => true,
            (_, Some(at), Some(cooldown)) => at.elapsed() < cooldown,
            (_, None, Some(_)) => false,
        }
    }
}

impl Connectivity for Prober {
    fn is_online(&self) -> bool {
        // Lock held across the probe; concurrent callers wait for its answer.
        let mut inner = self.inner.lock();
        if self.is_fresh(&inner) {
            return inner.state == ConnectivityState::Online;
        }
        self.probe(&mut inner)
    }

    fn refresh(&self) -> bool {
        let mut inner = self.inner.lock();
        self.probe(&mut inner)
    }

    fn state(&self) -> ConnectivityState {
        self.inner.lock().state
    }
}

/// Fixed connectivity, switchable at runtime. Used for `--offline` and to
/// pin the cache's freshness policy in tests.
#[derive(Debug)]
pub struct StaticConnectivity {
    state: AtomicU8,
}

const STATE_ONLINE: u8 = 1;
const STATE_OFFLINE: u8 = 2;

impl StaticConnectivity {
    pub fn online() -> Self {
        StaticConnectivity {
            state: AtomicU8::new(STATE_ONLINE),
        }
    }

    pub fn offline() -> Self {
        StaticConnectivity {
            state: AtomicU8::new(STATE_OFFLINE),
        }
    }

    pub fn set_online(&self, online: bool) {
        let state = if online { STATE_ONLINE } else { STATE_OFFLINE };
        self.state.store(state, Ordering::SeqCst);
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_ONLINE
    }

    fn refresh(&self) -> bool {
        self.is_online()
    }

    fn state(&self) -> ConnectivityState {
        ConnectivityState::from_online(self.is_online())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{fetcher, FakeTransport, Reply};
    use crate::fetch::TrustMode;

    const PROBE_URL: &str = "https://probe.example.com/";

    fn prober(transport: &Arc<FakeTransport>, recheck: Option<Duration>) -> Prober {
        Prober::new(fetcher(transport), PROBE_URL, Duration::from_secs(3), recheck)
    }

    #[test]
    fn test_any_response_is_online() {
        let transport = Arc::new(FakeTransport::new().route("probe", vec![Reply::Status(503, Vec::new())]));
        let prober = prober(&transport, None);

        assert_eq!(prober.state(), ConnectivityState::Unknown);
        assert!(prober.is_online());
        assert_eq!(prober.state(), ConnectivityState::Online);
    }

    #[test]
    fn test_errors_and_timeouts_are_offline() {
        let transport = Arc::new(FakeTransport::new().route("probe", vec![Reply::TimedOut]));
        assert!(!prober(&transport, None).is_online());

        let transport = Arc::new(FakeTransport::new().route("probe", vec![Reply::Refused]));
        let p = prober(&transport, None);
        assert!(!p.is_online());
        assert_eq!(p.state(), ConnectivityState::Offline);
    }

    #[test]
    fn test_probe_goes_through_trust_fallback() {
        let transport = Arc::new(
            FakeTransport::new().route("probe", vec![Reply::TrustFailure, Reply::Status(200, Vec::new())]),
        );
        assert!(prober(&transport, None).is_online());
        let modes: Vec<TrustMode> = transport.calls().into_iter().map(|(_, mode)| mode).collect();
        assert_eq!(modes, vec![TrustMode::Verify, TrustMode::Bypass]);
    }

    #[test]
    fn test_answer_is_memoized_without_cooldown() {
        let transport = Arc::new(FakeTransport::new().route(
            "probe",
            vec![Reply::Refused, Reply::Status(200, Vec::new())],
        ));
        let p = prober(&transport, None);

        assert!(!p.is_online());
        assert!(!p.is_online());
        assert!(!p.is_online());
        assert_eq!(transport.call_count("probe"), 1);

        // An explicit refresh picks up the restored network.
        assert!(p.refresh());
        assert!(p.is_online());
        assert_eq!(transport.call_count("probe"), 2);
    }

    #[test]
    fn test_expired_cooldown_reprobes() {
        let transport = Arc::new(FakeTransport::new().route(
            "probe",
            vec![Reply::Refused, Reply::Status(204, Vec::new())],
        ));
        let p = prober(&transport, Some(Duration::ZERO));

        assert!(!p.is_online());
        assert!(p.is_online());
        assert_eq!(transport.call_count("probe"), 2);
    }

    #[test]
    fn test_long_cooldown_reuses_answer() {
        let transport = Arc::new(FakeTransport::new().route("probe", vec![Reply::Status(200, Vec::new())]));
        let p = prober(&transport, Some(Duration::from_secs(3600)));

        assert!(p.is_online());
        assert!(p.is_online());
        assert_eq!(transport.call_count("probe"), 1);
    }

    #[test]
    fn test_static_connectivity() {
        let c = StaticConnectivity::offline();
        assert!(!c.is_online());
        assert_eq!(c.state(), ConnectivityState::Offline);
        c.set_online(true);
        assert!(c.refresh());
        assert_eq!(c.state().to_string(), "online");
    }
}
