//! Component error types

use std::fmt;

use crate::client::BrokerError;
use crate::config::ConfigError;
use crate::ip::IpError;
use crate::port::PortError;
use crate::uri::UriError;

/// Errors raised by the bridge components
#[derive(Debug)]
pub enum Error {
    /// Connection URI could not be decoded (recoverable)
    ConfigParse(UriError),
    /// Broker unreachable or refused the connection (recoverable)
    Connection(BrokerError),
    /// Port delivered a corrupt message (recoverable)
    TransportRead(PortError),
    /// Message is not a valid IP (recoverable)
    InvalidIp(IpError),
    /// Subscription failed (fatal)
    Subscription(BrokerError),
    /// Port could not be bound or connected (fatal)
    PortSetup(PortError),
    /// OPTIONS port closed before a usable configuration arrived (fatal)
    OptionsClosed,
    /// Settings file could not be loaded (fatal)
    Settings(ConfigError),
}

impl Error {
    /// Whether the component can keep going after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConfigParse(_)
                | Error::Connection(_)
                | Error::TransportRead(_)
                | Error::InvalidIp(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigParse(e) => write!(f, "Failed to parse connection uri: {}", e),
            Error::Connection(e) => write!(f, "Failed to connect to broker: {}", e),
            Error::TransportRead(e) => write!(f, "Failed to receive IP: {}", e),
            Error::InvalidIp(e) => write!(f, "Invalid IP: {}", e),
            Error::Subscription(e) => write!(f, "Failed to subscribe: {}", e),
            Error::PortSetup(e) => write!(f, "Failed to set up port: {}", e),
            Error::OptionsClosed => write!(f, "OPTIONS port closed before configuration arrived"),
            Error::Settings(e) => write!(f, "Failed to load settings: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigParse(e) => Some(e),
            Error::Connection(e) | Error::Subscription(e) => Some(e),
            Error::TransportRead(e) | Error::PortSetup(e) => Some(e),
            Error::InvalidIp(e) => Some(e),
            Error::Settings(e) => Some(e),
            Error::OptionsClosed => None,
        }
    }
}

impl From<UriError> for Error {
    fn from(e: UriError) -> Self {
        Error::ConfigParse(e)
    }
}

impl From<IpError> for Error {
    fn from(e: IpError) -> Self {
        Error::InvalidIp(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Settings(e)
    }
}

/// Result type for component operations
pub type Result<T> = std::result::Result<T, Error>;
