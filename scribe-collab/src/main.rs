use log::info;
use scribe_collab::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!("Starting scribe collaboration server on {}...", config.bind_addr);

    let server = CollabServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
