use smtp2notify::{Config, Listener, NotifyClient, Settings, logging};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    let settings = Settings::from_env();

    if let Err(e) = logging::init(&settings.log_level()) {
        eprintln!("Failed to initialise logging: {e}");
    }

    let config = match Config::validate(&settings) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let client = match NotifyClient::new(config.notify.api_key.clone(), &config.notify.hostname) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create notification client: {e}");
            process::exit(1);
        }
    };
    info!("Relaying to {}", client.endpoint());

    let listener = match Listener::new(config, Arc::new(client)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to configure SMTP listener: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = listener.run() {
        error!("Failed to start server: {e}");
        process::exit(1);
    }
}
