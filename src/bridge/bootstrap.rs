//! Connection bootstrap shared by both bridge directions

use tracing::{debug, info, warn};

use crate::client::Connector;
use crate::error::{Error, Result};
use crate::ip::Ip;
use crate::port::{InputPort, Message, OutputPort};
use crate::uri::{self, ConnectionDescriptor, UriError};

/// Wait on OPTIONS for a usable connection URI and connect to the broker.
///
/// Bad URIs and failed connects are logged (and reported on ERR when given)
/// and the next OPTIONS message is awaited. The OPTIONS port is closed once
/// a session is established.
pub async fn bootstrap<C: Connector>(
    name: &str,
    connector: &C,
    options: &mut dyn InputPort,
    errors: Option<&dyn OutputPort>,
) -> Result<(C::Session, ConnectionDescriptor)> {
    info!("Bridge '{}': waiting for options to arrive", name);

    loop {
        let message = match options.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => return Err(Error::OptionsClosed),
            Err(e) => {
                report(name, Error::TransportRead(e), errors).await;
                continue;
            }
        };

        match configure(name, connector, message).await {
            Ok(Some((session, descriptor))) => {
                options.close();
                info!(
                    "Bridge '{}': connected to {} (topic='{}', qos={})",
                    name,
                    descriptor.address(),
                    descriptor.destination,
                    descriptor.qos
                );
                return Ok((session, descriptor));
            }
            Ok(None) => {}
            Err(e) => report(name, e, errors).await,
        }
    }
}

async fn configure<C: Connector>(
    name: &str,
    connector: &C,
    message: Message,
) -> Result<Option<(C::Session, ConnectionDescriptor)>> {
    let packet = match Ip::from_frames(message)? {
        Ip::Packet(packet) => packet,
        other => {
            debug!("Bridge '{}': ignoring non-configuration IP {:?}", name, other);
            return Ok(None);
        }
    };

    let uri = std::str::from_utf8(packet.head())
        .map_err(|_| UriError::InvalidUri("connection URI is not UTF-8".to_string()))?;
    let descriptor = uri::parse(uri)?;

    let session = connector
        .connect(&descriptor)
        .await
        .map_err(Error::Connection)?;

    Ok(Some((session, descriptor)))
}

/// Log a recoverable error and mirror it on ERR
pub(super) async fn report(name: &str, error: Error, errors: Option<&dyn OutputPort>) {
    warn!("Bridge '{}': {}", name, error);

    if let Some(port) = errors {
        if let Err(e) = port.send(Ip::packet(error.to_string())).await {
            debug!("Bridge '{}': could not report on {}: {}", name, port.name(), e);
        }
    }
}
