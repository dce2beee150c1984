//! MQTT Bridge Components
//!
//! Bridges between an MQTT broker and a flow network.
//!
//! Both directions start the same way: they block on the OPTIONS port until
//! a connection URI arrives, connect once, and only then touch their data
//! port.
//!
//! # Outbound (`mqtt-pub`)
//!
//! IPs from IN are published to the broker. A flat packet goes to the topic
//! from the URI path; a bracketed group overrides it:
//!
//! ```text
//! [  "custom/topic"  payload1  payload2  ]
//! ```
//!
//! # Inbound (`mqtt-sub`)
//!
//! Every message on the subscribed topic is sent on OUT as
//!
//! ```text
//! [  topic  payload  ]
//! ```
//!
//! which an outbound bridge with an empty default topic republishes as is.

mod bootstrap;
mod inbound;
mod outbound;


pub use bootstrap::bootstrap;
pub use inbound::{frame_delivery, Subscriber};
pub use outbound::{Publisher, Route, RouteState, Router};
