use pollserve::dispatch::Dispatcher;
use pollserve::{Config, EventLoop, Server};
use tracing::info;
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
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = config.max_connections,
        max_request_size = config.max_request_size,
        request_timeout = ?config.request_timeout,
        "Starting pollserve"
    );

    let mut event_loop = EventLoop::new(config.poll_timeout, config.events_capacity)?;
    let server = Server::bind(&config, Dispatcher::demo()?)?;
    server.serve_forever(&mut event_loop)?;
    Ok(())
}
