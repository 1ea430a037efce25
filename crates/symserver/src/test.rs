//! Helpers for testing the web server.
//!
//! Both the application server and the fake symbol server bind to ephemeral
//! localhost ports. Keep the returned handles alive for the duration of the
//! test: dropping them aborts the server tasks, and dropping the application
//! server also deletes its temporary cache directory.

use std::net::TcpListener;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;

use symserver_service::config::{Config, DownloaderConfig};

use crate::endpoints;
use crate::service::RequestService;

fn spawn_app(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum_server::from_tcp(listener)
            .serve(app.into_make_service())
            .await;
    });
    (format!("http://{addr}"), handle)
}

/// A fake symbol server answering every sym file request with `body`.
pub(crate) struct SymbolServer {
    pub url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for SymbolServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) fn symbol_server(body: &'static str) -> SymbolServer {
    let app = Router::new().route(
        "/{debug_file}/{debug_id}/{sym_file}",
        get(move || async move { body }),
    );
    let (url, handle) = spawn_app(app);
    SymbolServer { url, handle }
}

/// A response received from the test server, with the body decoded as JSON.
pub(crate) struct TestResponse {
    pub status: u16,
    pub body: Value,
}

/// The application server under test.
pub(crate) struct TestServer {
    base: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
    _cache_dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts the full application against the given symbol source.
pub(crate) async fn server(symbol_url: &str) -> TestServer {
    let cache_dir = TempDir::new().unwrap();

    let config = Config {
        cache_dir: cache_dir.path().to_owned(),
        sources: vec![symbol_url.to_owned()],
        downloader: DownloaderConfig {
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            max_download_timeout: Duration::from_secs(5),
            retries: 0,
        },
        ..Config::default()
    };

    let service = RequestService::create(config).unwrap();
    let (base, handle) = spawn_app(endpoints::create_app(service));

    TestServer {
        base,
        client: reqwest::Client::new(),
        handle,
        _cache_dir: cache_dir,
    }
}

impl TestServer {
    async fn decode(response: reqwest::Response) -> TestResponse {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        TestResponse { status, body }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        Self::decode(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.post_raw(path, &body.to_string()).await
    }

    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body.to_owned())
            .send()
            .await
            .unwrap();
        Self::decode(response).await
    }
}
