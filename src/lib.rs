//! Async AgentX (RFC 2741) subagent library.
//!
//! An AgentX subagent exports MIB objects through a master SNMP agent
//! (for example net-snmp's `snmpd` with `master agentx`). The subagent
//! registers scalars and tables, and the master forwards SNMP requests for
//! those subtrees over a Unix socket or TCP connection.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use async_agentx::binding::ObjectSpec;
//! use async_agentx::registry::{IndexType, TableSpec};
//! use async_agentx::{Session, Value, oid};
//!
//! # async fn example() -> async_agentx::Result<()> {
//! let mut session = Session::builder("unix:/var/agentx/master".parse()?)
//!     .description("example subagent")
//!     .build();
//!
//! let greeting = session
//!     .register_scalar(
//!         oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0),
//!         ObjectSpec::display_string("hello").read_write(),
//!     )
//!     .await?;
//!
//! let table = session
//!     .register_table(
//!         oid!(1, 3, 6, 1, 4, 1, 99999, 2, 1),
//!         TableSpec::new()
//!             .index(IndexType::Integer32)
//!             .column(2, ObjectSpec::display_string("")),
//!     )
//!     .await?;
//! table.add_row_with(&[1.into()], [(2, Value::from("eth0"))])?;
//!
//! session.connect().await?;
//! let reason = session.run().await?;
//! println!("closed by master: {reason}, greeting is {}", greeting.get());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`agent`]: session lifecycle and request dispatch
//! - [`registry`]: scalar and table registration, lookups, index encoding
//! - [`binding`]: shared values behind registered objects
//! - [`pdu`]: AgentX PDU types and the stream codec
//! - [`ber`]: BER primitives for SNMP values
//! - [`transport`]: connections to the master agent

pub mod agent;
pub mod ber;
pub mod binding;
pub mod error;
pub mod handler;
pub mod oid;
pub mod pdu;
pub mod prelude;
pub mod registry;
pub mod transport;
pub mod value;
pub mod varbind;

pub(crate) mod util;

pub use agent::{OpenSummary, Session, SessionBuilder, SessionConfig, SessionHandle, SessionState};
pub use binding::{Access, BindingHandle, ObjectSpec};
pub use error::{Error, ErrorStatus, Result};
pub use oid::Oid;
pub use pdu::CloseReason;
pub use registry::{Registry, TableHandle, TableSpec};
pub use transport::{Connector, MasterAddress};
pub use value::Value;
pub use varbind::VarBind;
