//! Session configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use crate::oid::Oid;
use crate::pdu::{DEFAULT_MAX_PAYLOAD, DEFAULT_PRIORITY};
use crate::registry::Registry;
use crate::transport::{Connector, MasterAddress};

use super::Session;

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Where the master agent listens.
    pub address: MasterAddress,
    /// Subagent identity sent in the Open PDU (`o.id`). Empty by default.
    pub agent_id: Oid,
    /// Description sent in the Open PDU (`o.descr`).
    pub description: String,
    /// Seconds the master should wait for our responses (`o.timeout`);
    /// 0 lets the master use its default.
    pub timeout: u8,
    /// Registration priority (lower is preferred by the master).
    pub priority: u8,
    /// How long locally-originated requests wait for their Response.
    pub request_timeout: Duration,
    /// Largest payload accepted from the master.
    pub max_payload: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: MasterAddress::default(),
            agent_id: Oid::empty(),
            description: String::from("async-agentx subagent"),
            timeout: 0,
            priority: DEFAULT_PRIORITY,
            request_timeout: Duration::from_secs(5),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Builder for [`Session`].
///
/// ```rust
/// use async_agentx::{Session, oid};
/// use std::time::Duration;
///
/// let session = Session::builder("tcp:localhost:705".parse().unwrap())
///     .agent_id(oid!(1, 3, 6, 1, 4, 1, 99999))
///     .description("example subagent")
///     .request_timeout(Duration::from_secs(2))
///     .build();
/// assert!(!session.is_open());
/// ```
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    registry: Option<Registry>,
}

impl SessionBuilder {
    pub(crate) fn new(address: MasterAddress) -> Self {
        Self {
            config: SessionConfig {
                address,
                ..SessionConfig::default()
            },
            connector: None,
            registry: None,
        }
    }

    /// Start from a complete configuration.
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            connector: None,
            registry: None,
        }
    }

    pub fn agent_id(mut self, id: Oid) -> Self {
        self.config.agent_id = id;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    /// Response timeout advertised to the master, in seconds.
    pub fn timeout(mut self, seconds: u8) -> Self {
        self.config.timeout = seconds;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_payload(mut self, max: usize) -> Self {
        self.config.max_payload = max;
        self
    }

    /// Connect through `connector` instead of [`SessionConfig::address`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use an existing registry (for example one populated before the
    /// session was built).
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build a disconnected session.
    pub fn build(self) -> Session {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(self.config.address.clone()));
        Session::new(self.config, connector, self.registry.unwrap_or_default())
    }
}
