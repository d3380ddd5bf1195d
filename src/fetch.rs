//! HTTPS fetching with a certificate-trust fallback.
//!
//! Every request is first made with normal certificate validation. If that
//! fails with a recognised certificate-validation error (the signature of an
//! intercepting corporate proxy), the same request is retried exactly once
//! with validation disabled, under a fresh timeout. Any other failure is
//! returned as-is. Whether the bypass path was ever needed is recorded and
//! exposed as a [`ConnectionMode`].

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// Upper bound on a response body; larger bodies are an error.
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

/// Lowercased fragments identifying certificate-validation failures across
/// OpenSSL, Secure Transport, SChannel and rustls error texts.
const TRUST_ERROR_MARKERS: &[&str] = &[
    "unable_to_verify_leaf_signature",
    "self_signed_cert_in_chain",
    "depth_zero_self_signed_cert",
    "cert_has_expired",
    "unable_to_get_issuer_cert",
    "cert_untrusted",
    "certificate verify failed",
    "self signed certificate",
    "self-signed certificate",
    "unable to get local issuer certificate",
    "unable to verify the first certificate",
    "certificate has expired",
    "invalid peer certificate",
    "certificate is not trusted",
    "issued by an authority that is not trusted",
    "invalid certificate chain",
    "certificate was not trusted",
    "unknown root",
    "untrusted root",
    "certificate chain could not be verified",
];

/// Whether an error text names a certificate-validation failure.
pub fn is_trust_error_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRUST_ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

/// Certificate handling for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    Verify,
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Overrides the fetcher's default timeout.
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        FetchRequest {
            method: Method::Head,
            ..FetchRequest::get(url)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully buffered response. Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    status: u16,
    body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        FetchResponse { status, body }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }
}

/// One HTTP attempt. Implementations classify their failures into
/// [`FetchError::Timeout`], [`FetchError::Trust`] or [`FetchError::Transport`].
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &FetchRequest,
        trust: TrustMode,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError>;
}

/// `ureq` transport with one agent per trust mode.
pub struct UreqTransport {
    strict: ureq::Agent,
    bypass: ureq::Agent,
}

impl UreqTransport {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let strict_tls = native_tls::TlsConnector::new()?;
        let bypass_tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        Ok(UreqTransport {
            strict: ureq::AgentBuilder::new()
                .user_agent(user_agent)
                .tls_connector(Arc::new(strict_tls))
                .build(),
            bypass: ureq::AgentBuilder::new()
                .user_agent(user_agent)
                .tls_connector(Arc::new(bypass_tls))
                .build(),
        })
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: &FetchRequest,
        trust: TrustMode,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let agent = match trust {
            TrustMode::Verify => &self.strict,
            TrustMode::Bypass => &self.bypass,
        };

        let mut call = agent
            .request(request.method.as_str(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match call.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(classify_transport(&request.url, &transport, timeout));
            }
        };

        let status = response.status();
        let body = match read_capped(response.into_reader(), MAX_BODY_BYTES) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                return Err(FetchError::Timeout {
                    url: request.url.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(FetchError::Body(e)),
        };

        Ok(FetchResponse::new(status, body))
    }
}

/// Read a whole body, failing rather than truncating past `limit` bytes.
fn read_capped(reader: impl Read, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("response body exceeds {} bytes", limit),
        ));
    }
    Ok(body)
}

/// Map a `ureq` transport failure onto the fetch error taxonomy by walking
/// its source chain.
fn classify_transport(url: &str, transport: &ureq::Transport, timeout: Duration) -> FetchError {
    let mut message = transport.to_string();
    let mut timed_out = false;

    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            timed_out |= io.kind() == std::io::ErrorKind::TimedOut;
        }
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }

    if timed_out || message.to_ascii_lowercase().contains("timed out") {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if is_trust_error_message(&message) {
        FetchError::Trust {
            url: url.to_string(),
            message,
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message,
        }
    }
}

/// How connections have been made so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Untested,
    Secure,
    Bypass,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionMode::Untested => "untested",
            ConnectionMode::Secure => "secure",
            ConnectionMode::Bypass => "bypass-mode",
        })
    }
}

/// Fetch wrapper shared by every provider.
pub struct SecureFetch {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
    tested: AtomicBool,
    bypass_used: AtomicBool,
}

impl SecureFetch {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        SecureFetch {
            transport,
            default_timeout,
            tested: AtomicBool::new(false),
            bypass_used: AtomicBool::new(false),
        }
    }

    /// Fetcher over real HTTPS.
    pub fn with_ureq(user_agent: &str, default_timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self::new(Arc::new(UreqTransport::new(user_agent)?), default_timeout))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let err = match self.transport.send(request, TrustMode::Verify, timeout) {
            Ok(response) => {
                if !self.tested.swap(true, Ordering::SeqCst) {
                    info!("Secure connection successful (certificate verification enabled)");
                }
                return Ok(response);
            }
            Err(err) => err,
        };

        if !err.is_trust_failure() {
            if err.is_timeout() {
                error!("Request timeout: {} after {}ms", request.url, timeout.as_millis());
            }
            return Err(err);
        }

        warn!(
            "Certificate verification failed for {}, retrying without verification: {}",
            request.url, err
        );

        match self.transport.send(request, TrustMode::Bypass, timeout) {
            Ok(response) => {
                self.tested.store(true, Ordering::SeqCst);
                if !self.bypass_used.swap(true, Ordering::SeqCst) {
                    warn!("Connected with certificate verification disabled (intercepting proxy mode)");
                }
                Ok(response)
            }
            Err(fallback) => {
                if fallback.is_timeout() {
                    error!(
                        "Request timeout without verification: {} after {}ms",
                        request.url,
                        timeout.as_millis()
                    );
                } else {
                    error!("Both verified and unverified attempts failed: {}", fallback);
                }
                Err(fallback)
            }
        }
    }

    pub fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.fetch(&FetchRequest::get(url))
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        if self.bypass_used.load(Ordering::SeqCst) {
            ConnectionMode::Bypass
        } else if self.tested.load(Ordering::SeqCst) {
            ConnectionMode::Secure
        } else {
            ConnectionMode::Untested
        }
    }
}

/// In-process transport for tests: canned replies routed by URL substring.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Status(u16, Vec<u8>),
        TrustFailure,
        Refused,
        TimedOut,
    }

    impl Reply {
        pub(crate) fn json(status: u16, value: serde_json::Value) -> Reply {
            Reply::Status(status, serde_json::to_vec(&value).unwrap())
        }

        fn into_result(self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
            match self {
                Reply::Status(status, body) => Ok(FetchResponse::new(status, body)),
                Reply::TrustFailure => Err(FetchError::Trust {
                    url: url.to_string(),
                    message: "certificate verify failed: self signed certificate in certificate chain".into(),
                }),
                Reply::Refused => Err(FetchError::Transport {
                    url: url.to_string(),
                    message: "Connection refused (os error 111)".into(),
                }),
                Reply::TimedOut => Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    }

    /// Each route replays its replies in order; the last one repeats.
    /// Unrouted URLs are refused.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        routes: Mutex<Vec<(String, VecDeque<Reply>)>>,
        calls: Mutex<Vec<(String, TrustMode)>>,
    }

    impl FakeTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn route(self, pattern: &str, replies: Vec<Reply>) -> Self {
            self.routes
                .lock()
                .push((pattern.to_string(), replies.into_iter().collect()));
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, TrustMode)> {
            self.calls.lock().clone()
        }

        pub(crate) fn call_count(&self, pattern: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|(url, _)| url.contains(pattern))
                .count()
        }
    }

    impl Transport for FakeTransport {
        fn send(
            &self,
            request: &FetchRequest,
            trust: TrustMode,
            timeout: Duration,
        ) -> Result<FetchResponse, FetchError> {
            self.calls.lock().push((request.url.clone(), trust));

            let reply = self
                .routes
                .lock()
                .iter_mut()
                .find(|(pattern, _)| request.url.contains(pattern.as_str()))
                .and_then(|(_, replies)| {
                    if replies.len() > 1 {
                        replies.pop_front()
                    } else {
                        replies.front().cloned()
                    }
                })
                .unwrap_or(Reply::Refused);

            reply.into_result(&request.url, timeout)
        }
    }

    pub(crate) fn fetcher(transport: &Arc<FakeTransport>) -> Arc<SecureFetch> {
        Arc::new(SecureFetch::new(transport.clone(), Duration::from_secs(10)))
    }
}
