//! HTTP dispatcher contract: one method+URL+headers+body through one proxy
//! (spec.md §4.6). The core defines the contract; a concrete transport is
//! supplied by the embedder and injected into the `Rotator`.

use crate::proxy::Endpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// One dispatch request. `follow_redirects` defaults to `false` per spec
/// invariant; the caller must opt in explicitly.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub attempt_timeout: Duration,
    pub follow_redirects: bool,
    pub verify_tls: bool,
}

impl DispatchRequest {
    pub fn new(method: Method, url: impl Into<String>, attempt_timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            attempt_timeout,
            follow_redirects: false,
            verify_tls: true,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Normalized dispatch outcome (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub elapsed_ms: u64,
    pub proxy_id: String,
}

/// Normalized dispatcher error kinds. These are the only values that cross
/// the dispatcher boundary; transport-specific error types never leak above
/// it, and the caller's proxy credentials never appear in any variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    Connect,
    Tls,
    ReadTimeout,
    WriteTimeout,
    Dns,
    Protocol,
    Proxy5xx,
    Upstream4xx,
    Upstream5xx,
    Cancelled,
}

impl DispatchErrorKind {
    /// Whether the retry executor should treat this outcome as retryable
    /// (spec.md §4.5 step 5). Upstream 4xx is a caller error, never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Upstream4xx | Self::Cancelled)
    }
}

/// Executes one attempt through one proxy. Implementations never retry
/// internally (spec.md §4.6 invariant); the retry executor owns that policy.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: DispatchRequest,
        proxy: &Endpoint,
        cancellation: &CancellationToken,
    ) -> Result<Response, DispatchErrorKind>;
}

/// Refuses target URLs that resolve to loopback/private/link-local
/// addresses, for server deployments that proxy arbitrary caller-supplied
/// URLs (spec.md §4.6 Safety). Host resolution failure is treated as safe
/// to refuse (fails closed).
pub fn refuses_unsafe_target(host: &str, port: u16) -> bool {
    let candidate = format!("{host}:{port}");
    match candidate.to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip()).any(|ip| is_disallowed(ip)),
        Err(_) => true,
    }
}

fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => is_disallowed_v6(v6),
    }
}

fn is_disallowed_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_disallowed_v6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_disallowed_v4(v4);
    }
    // fc00::/7 unique local, fe80::/10 link-local
    let segments = ip.segments();
    (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80
}
