//! Explicit per-request context handed to the limiter.
//!
//! The host framework fills in what it knows about the request (which route
//! matched, the peer address, the headers) and the limiter works only from
//! this value; there is no ambient "current request".

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};

use crate::rate_limit::KeyFunction;

/// Request extension naming the matched route.
///
/// The router inserts this before the rate limit layer runs. A request
/// without it has no resolvable handler and passes through unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Route identity, unique per handler.
    pub name: String,
    /// Enclosing group (blueprint / nested router), if any.
    pub group: Option<String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), group: None }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Request extension carrying the transport peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub IpAddr);

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.ip())
    }
}

/// Everything the limiter may inspect about one request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub endpoint: Option<String>,
    pub group: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestInfo {
    /// Context for a request routed to `endpoint`.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self { endpoint: Some(endpoint.into()), ..Self::default() }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Capture the context of an `http` request from its parts.
    ///
    /// Reads the [`Endpoint`] and [`RemoteAddr`] extensions if present.
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        let endpoint = parts.extensions.get::<Endpoint>();
        Self {
            endpoint: endpoint.map(|e| e.name.clone()),
            group: endpoint.and_then(|e| e.group.clone()),
            remote_addr: parts.extensions.get::<RemoteAddr>().map(|a| a.0),
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }

    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Default caller identity.
    ///
    /// The first address of `X-Forwarded-For` (the client as reported by the
    /// outermost trusted proxy), else the peer address, else `"unknown"`.
    pub fn client_addr(&self) -> String {
        if let Some(first) = self
            .header("x-forwarded-for")
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first.to_string();
        }
        match self.remote_addr {
            Some(ip) => ip.to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// The built-in key function: partition by client address.
pub fn remote_addr_key() -> KeyFunction {
    crate::rate_limit::key_function(|req: Arc<RequestInfo>| async move { req.client_addr() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::net::Ipv4Addr;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let info = RequestInfo::for_endpoint("index")
            .with_remote_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_header(
                http::header::HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
            );
        assert_eq!(info.client_addr(), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let peer = RequestInfo::default().with_remote_addr(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(peer.client_addr(), "10.1.2.3");
        assert_eq!(RequestInfo::default().client_addr(), "unknown");
    }

    #[test]
    fn from_parts_reads_extensions() {
        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri("/items")
            .body(())
            .unwrap();
        request.extensions_mut().insert(Endpoint::new("create_item").in_group("items"));
        request
            .extensions_mut()
            .insert(RemoteAddr::from(SocketAddr::from(([192, 0, 2, 1], 4000))));
        let (parts, _) = request.into_parts();

        let info = RequestInfo::from_parts(&parts);
        assert_eq!(info.endpoint.as_deref(), Some("create_item"));
        assert_eq!(info.group.as_deref(), Some("items"));
        assert_eq!(info.client_addr(), "192.0.2.1");
        assert_eq!(info.method, Method::POST);
    }

    #[tokio::test]
    async fn default_key_function_uses_client_addr() {
        let f = remote_addr_key();
        let info = Arc::new(RequestInfo::default().with_remote_addr(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(f(info).await, "127.0.0.1");
    }
}
