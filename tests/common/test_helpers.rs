#![allow(dead_code)]

use routelimit::{Endpoint, ManualClock, RateLimitLayer, RateLimitService, RateLimiter, RemoteAddr};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower::{service_fn, Layer, ServiceExt};

pub type Handler = BoxCloneService<http::Request<()>, http::Response<String>, Infallible>;

/// A handler that counts its calls and answers 200 "ok".
pub fn counting_handler(calls: Arc<AtomicUsize>) -> Handler {
    service_fn(move |_req: http::Request<()>| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Infallible>(http::Response::new(String::from("ok"))) }
    })
    .boxed_clone()
}

pub fn ok_handler() -> Handler {
    counting_handler(Arc::new(AtomicUsize::new(0)))
}

/// Limiter pinned to a manual clock the test keeps a handle to.
pub fn manual_limiter() -> (RateLimiter, ManualClock) {
    let clock = ManualClock::default();
    (RateLimiter::builder().clock(clock.clone()).build(), clock)
}

pub fn layered(limiter: Arc<RateLimiter>, handler: Handler) -> RateLimitService<Handler> {
    RateLimitLayer::from_shared(limiter).layer(handler)
}

/// A request already routed to `endpoint`, coming from `last_octet`.
pub fn routed(endpoint: &str, last_octet: u8) -> http::Request<()> {
    let mut req = http::Request::new(());
    req.extensions_mut().insert(Endpoint::new(endpoint));
    req.extensions_mut().insert(RemoteAddr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet))));
    req
}

pub fn routed_in_group(endpoint: &str, group: &str, last_octet: u8) -> http::Request<()> {
    let mut req = routed(endpoint, last_octet);
    req.extensions_mut().insert(Endpoint::new(endpoint).in_group(group));
    req
}

pub async fn send(
    svc: &RateLimitService<Handler>,
    req: http::Request<()>,
) -> http::Response<String> {
    svc.clone().oneshot(req).await.expect("rate limit service failed")
}
