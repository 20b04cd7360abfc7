use protobuf_rpc::config::Config;
use protobuf_rpc::registry::MethodRegistry;
use protobuf_rpc::server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        transport = ?config.transport,
        workers = ?config.workers,
        max_connections = config.max_connections,
        max_frame_size = config.max_frame_size,
        on_decode_error = ?config.session.on_decode_error,
        envelope = ?config.session.envelope,
        "Starting protobuf-rpc server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async move {
        let server = Server::new(config, MethodRegistry::with_default_methods());

        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for interrupt");
                return;
            }
            info!("Received interrupt, shutting down");
            shutdown.shutdown();
        });

        server.run().await
    })?;

    Ok(())
}
