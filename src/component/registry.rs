//! Component registry entries printed by `--json`

use serde::Serialize;

/// Description of one component port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortDoc {
    pub name: &'static str,
    #[serde(rename = "Type")]
    pub kind: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Registry entry of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryEntry {
    pub description: &'static str,
    pub elementary: bool,
    pub inports: Vec<PortDoc>,
    pub outports: Vec<PortDoc>,
}

impl RegistryEntry {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

const OPTIONS: PortDoc = PortDoc {
    name: "OPTIONS",
    kind: "string",
    description: "Connection URI: tcp://[user[:pass]@]host[:port]/topic?clientId=&clean=&qos=",
    required: true,
};

const ERR: PortDoc = PortDoc {
    name: "ERR",
    kind: "string",
    description: "Configuration and connection errors",
    required: false,
};

/// Entry of the outbound component
pub fn publisher() -> RegistryEntry {
    RegistryEntry {
        description: "Publishes IPs to an MQTT broker",
        elementary: true,
        inports: vec![
            OPTIONS,
            PortDoc {
                name: "IN",
                kind: "all",
                description: "Payloads, optionally grouped as [ topic payload... ]",
                required: true,
            },
        ],
        outports: vec![ERR],
    }
}

/// Entry of the inbound component
pub fn subscriber() -> RegistryEntry {
    RegistryEntry {
        description: "Subscribes to an MQTT topic and emits received messages",
        elementary: true,
        inports: vec![OPTIONS],
        outports: vec![
            PortDoc {
                name: "OUT",
                kind: "all",
                description: "Messages framed as [ topic payload ]",
                required: true,
            },
            ERR,
        ],
    }
}
