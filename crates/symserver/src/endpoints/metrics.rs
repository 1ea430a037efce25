//! Measures symbolication requests.
//!
//! The layer times every request against a symbolication endpoint and emits
//! the `symbolicate.api` timer tagged with the API version once the response
//! is ready. Validation failures are included in the timing, the request was
//! still served. Other routes pass through unmeasured.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response};
use tower_layer::Layer;
use tower_service::Service as TowerService;

use symserver_service::metric;

/// The API version for a request path, `None` for paths that are not
/// symbolication endpoints.
fn api_version(path: &str) -> Option<&'static str> {
    match path {
        "/symbolicate/v4" => Some("v4"),
        "/symbolicate/v5" => Some("v5"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ApiMetricsLayer;

#[derive(Clone)]
pub struct ApiMetricsService<S> {
    service: S,
}

impl<S> Layer<S> for ApiMetricsLayer {
    type Service = ApiMetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        Self::Service { service }
    }
}

impl<S, B, ResB> TowerService<Request<B>> for ApiMetricsService<S>
where
    S: TowerService<Request<B>, Response = Response<ResB>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let version = api_version(request.uri().path());
        let start = Instant::now();
        let future = self.service.call(request);

        Box::pin(async move {
            let response = future.await;
            if let Some(version) = version {
                metric!(timer("symbolicate.api") = start.elapsed(), "version" => version);
            }
            response
        })
    }
}
