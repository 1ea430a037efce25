use std::net::{SocketAddr, TcpListener};

use anyhow::{Context, Result};

use symserver_service::metric;

use crate::endpoints;
use crate::service::RequestService;

use symserver_service::config::Config;

/// Starts the HTTP server based on the loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see
    // restarts even if service creation fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("symserver")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let service = RequestService::create(config.clone())?;
        let app = endpoints::create_app(service);

        let socket = TcpListener::bind(config.bind.parse::<SocketAddr>()?)
            .with_context(|| format!("failed to bind to {}", config.bind))?;
        tracing::info!("Starting HTTP server on {}", socket.local_addr()?);

        axum_server::from_tcp(socket)
            .serve(app.into_make_service())
            .await?;

        tracing::info!("System shutdown complete");
        Ok(())
    })
}
