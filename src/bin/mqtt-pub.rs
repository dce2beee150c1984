//! mqtt-pub - publishes IPs to an MQTT broker
//!
//! Usage:
//!   mqtt-pub --port.options <ENDPOINT> --port.in <ENDPOINT> [OPTIONS]
//!
//! Options:
//!   --port.err <ENDPOINT>  Error port endpoint
//!   --json                 Print component documentation in JSON
//!   --debug                Enable debug logging
//!   -c, --config <FILE>    Settings file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)

use clap::{CommandFactory, Parser};
use tokio::sync::broadcast;
use tracing::error;

use vibemq_flow::component::{self, registry, PubArgs};

#[tokio::main]
async fn main() {
    let args = PubArgs::parse();

    if args.common.json {
        match registry::publisher().to_json() {
            Ok(doc) => println!("{}", doc),
            Err(e) => {
                eprintln!("Error rendering registry entry: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(endpoints) = args.endpoints() else {
        let _ = PubArgs::command().print_help();
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

    if let Err(e) = component::run_publisher(endpoints, settings, shutdown).await {
        error!("{}", e);
        eprintln!("mqtt-pub: {}", e);
        std::process::exit(1);
    }
}
