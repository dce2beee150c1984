//! mqtt-sub - emits messages from an MQTT subscription
//!
//! Usage:
//!   mqtt-sub --port.options <ENDPOINT> --port.out <ENDPOINT> [OPTIONS]

use clap::{CommandFactory, Parser};
use tokio::sync::broadcast;
use tracing::error;

use vibemq_flow::component::{self, registry, SubArgs};

#[tokio::main]
async fn main() {
    let args = SubArgs::parse();

    if args.common.json {
        match registry::subscriber().to_json() {
            Ok(doc) => println!("{}", doc),
            Err(e) => {
                eprintln!("Error rendering registry entry: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(endpoints) = args.endpoints() else {
        let _ = SubArgs::command().print_help();
        std::process::exit(1);
    };

    let settings = match component::load_settings(&args.common) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = component::init_logging(&args.common, &settings) {
        eprintln!("Error initializing logging: {}", e);
        std::process::exit(1);
    }

    let (shutdown, _) = broadcast::channel(1);
    component::spawn_signal_handler(shutdown.clone());

    if let Err(e) = component::run_subscriber(endpoints, settings, shutdown).await {
        error!("{}", e);
        eprintln!("mqtt-sub: {}", e);
        std::process::exit(1);
    }
}
