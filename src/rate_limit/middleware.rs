use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Request, Response};
use tower_layer::Layer;
use tower_service::Service;

use crate::error::{LimiterError, MiddlewareError};
use crate::limiter::RateLimiter;
use crate::request::RequestInfo;

/// A layer that enforces per-route limits with a [`RateLimiter`].
///
/// The router must insert an [`Endpoint`](crate::Endpoint) extension for
/// requests to be limited; requests without one pass straight through.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self::from_shared(Arc::new(limiter))
    }

    /// Use a limiter that is also held elsewhere (for `open`/`close` or
    /// runtime toggling).
    pub fn from_shared(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, limiter: self.limiter.clone() }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
///
/// Rejections become `429 Too Many Requests` responses with an empty body
/// and a `Retry-After` header. Every response for a limited endpoint,
/// rejected or not, carries the `RateLimit-*` headers.
#[derive(Clone, Debug)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B, R> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response<R>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
    R: Default + Send + 'static,
{
    type Response = Response<R>;
    type Error = MiddlewareError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(MiddlewareError::Inner)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = self.limiter.clone();
        // Keep the instance that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let info = Arc::new(RequestInfo::from_parts(&parts));
            let req = Request::from_parts(parts, body);

            let mut response = match limiter.before_request(&info).await {
                Ok(()) => inner.call(req).await.map_err(MiddlewareError::Inner)?,
                Err(LimiterError::Exceeded(rejection)) => rejection.into_response(),
                Err(LimiterError::Store(err)) => return Err(MiddlewareError::Store(err)),
            };

            if let Some(metrics) = limiter.after_request(&info).await.map_err(MiddlewareError::Store)? {
                metrics.apply(response.headers_mut());
            }
            Ok(response)
        })
    }
}
