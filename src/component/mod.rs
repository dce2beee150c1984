//! Component Runtime
//!
//! Wiring shared by the `mqtt-pub` and `mqtt-sub` binaries: logging setup,
//! signal handling, port setup and the bridge lifecycle.

pub mod cli;
pub mod registry;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::FmtSubscriber;

use crate::bridge::{self, Publisher, Subscriber};
use crate::client::MqttConnector;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::port::{OutputPort, TcpInputPort, TcpOutputPort};

pub use cli::{CommonArgs, LogLevel, PortEndpoints, PubArgs, SubArgs};

/// Load settings from `--config`, defaults and the environment
pub fn load_settings(args: &CommonArgs) -> Result<Settings> {
    Ok(Settings::load(args.config.as_deref())?)
}

/// Install the global tracing subscriber
pub fn init_logging(
    args: &CommonArgs,
    settings: &Settings,
) -> std::result::Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = args.resolve_log_level(&settings.log.level);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// Broadcast a shutdown once SIGINT or SIGTERM arrives
pub fn spawn_signal_handler(shutdown: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Interrupt received, shutting down");
        let _ = shutdown.send(());
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            debug!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Run a startup step unless shutdown is signalled first
async fn unless_shutdown<T>(
    shutdown: &mut broadcast::Receiver<()>,
    step: impl Future<Output = Result<T>>,
) -> Result<Option<T>> {
    tokio::select! {
        result = step => result.map(Some),
        _ = shutdown.recv() => Ok(None),
    }
}

async fn connect_errors_port(
    endpoints: &PortEndpoints,
    settings: &Settings,
) -> Result<Option<TcpOutputPort>> {
    match &endpoints.errors {
        Some(endpoint) => {
            let port = TcpOutputPort::connect(
                "ERR",
                endpoint,
                &settings.ports,
                settings.ports.connect_timeout_duration(),
            )
            .await
            .map_err(Error::PortSetup)?;
            Ok(Some(port))
        }
        None => Ok(None),
    }
}

/// Run the outbound component until IN closes or shutdown is signalled
pub async fn run_publisher(
    endpoints: PortEndpoints,
    settings: Settings,
    shutdown: broadcast::Sender<()>,
) -> Result<()> {
    const NAME: &str = "mqtt-pub";
    let timeout = settings.ports.connect_timeout_duration();
    let grace = settings.broker.disconnect_grace_duration();
    let mut setup_shutdown = shutdown.subscribe();
    let run_shutdown = shutdown.subscribe();

    let mut options = TcpInputPort::bind_persistent("OPTIONS", &endpoints.options, &settings.ports)
        .await
        .map_err(Error::PortSetup)?;
    let mut input = TcpInputPort::bind("IN", &endpoints.data, &settings.ports)
        .await
        .map_err(Error::PortSetup)?;

    let Some(errors) =
        unless_shutdown(&mut setup_shutdown, connect_errors_port(&endpoints, &settings)).await?
    else {
        info!("Component '{}': stopped while connecting ERR", NAME);
        return Ok(());
    };

    info!("Component '{}': waiting for IN to connect", NAME);
    let wait = async {
        input
            .wait_for_peer(timeout)
            .await
            .map_err(Error::PortSetup)
    };
    if unless_shutdown(&mut setup_shutdown, wait).await?.is_none() {
        info!("Component '{}': stopped while waiting for IN", NAME);
        return Ok(());
    }

    let connector = MqttConnector::new(settings.broker.clone());
    let errors_ref = errors.as_ref().map(|port| port as &dyn OutputPort);
    let bootstrap = bridge::bootstrap(NAME, &connector, &mut options, errors_ref);
    let Some((session, descriptor)) = unless_shutdown(&mut setup_shutdown, bootstrap).await?
    else {
        info!("Component '{}': stopped before configuration arrived", NAME);
        return Ok(());
    };

    let result = Publisher::new(NAME, session, &descriptor, grace)
        .run(&mut input, run_shutdown)
        .await;

    if let Some(port) = errors {
        port.close(grace).await;
    }
    result
}

/// Run the inbound component until shutdown is signalled
pub async fn run_subscriber(
    endpoints: PortEndpoints,
    settings: Settings,
    shutdown: broadcast::Sender<()>,
) -> Result<()> {
    const NAME: &str = "mqtt-sub";
    let timeout = settings.ports.connect_timeout_duration();
    let grace = settings.broker.disconnect_grace_duration();
    let mut setup_shutdown = shutdown.subscribe();
    let run_shutdown = shutdown.subscribe();

    let mut options = TcpInputPort::bind_persistent("OPTIONS", &endpoints.options, &settings.ports)
        .await
        .map_err(Error::PortSetup)?;

    let dial = async {
        TcpOutputPort::connect("OUT", &endpoints.data, &settings.ports, timeout)
            .await
            .map_err(Error::PortSetup)
    };
    let Some(output) = unless_shutdown(&mut setup_shutdown, dial).await? else {
        info!("Component '{}': stopped while connecting OUT", NAME);
        return Ok(());
    };
    let output = Arc::new(output);

    let Some(errors) =
        unless_shutdown(&mut setup_shutdown, connect_errors_port(&endpoints, &settings)).await?
    else {
        info!("Component '{}': stopped while connecting ERR", NAME);
        return Ok(());
    };

    let connector = MqttConnector::new(settings.broker.clone());
    let errors_ref = errors.as_ref().map(|port| port as &dyn OutputPort);
    let bootstrap = bridge::bootstrap(NAME, &connector, &mut options, errors_ref);
    let Some((session, descriptor)) = unless_shutdown(&mut setup_shutdown, bootstrap).await?
    else {
        info!("Component '{}': stopped before configuration arrived", NAME);
        return Ok(());
    };

    let result = Subscriber::new(NAME, session, &descriptor, grace)
        .run(output.clone(), run_shutdown)
        .await;

    // The forwarder has released its handle once run returns
    if let Ok(port) = Arc::try_unwrap(output) {
        port.close(grace).await;
    }
    if let Some(port) = errors {
        port.close(grace).await;
    }
    result
}
