//! AgentX subagent session.
//!
//! A [`Session`] connects to the master agent, opens a session, registers
//! the contents of its [`Registry`](crate::registry::Registry) and then
//! serves Get, GetNext, GetBulk and the four SET phases from
//! [`Session::run`]. A [`SessionHandle`] gives other tasks access to
//! registration, notifications and close while `run` is active.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect--> Opening --Open accepted--> Open
//!      ^                       |                        |
//!      +------- failure -------+------ close/Close -----+
//! ```
//!
//! Nothing reconnects by itself. After [`Session::run`] returns, call
//! [`Session::reconnect`] (or [`Session::connect`]) to go through Open and
//! registration again.

mod builder;
mod dispatch;
mod session;
pub(crate) mod set_handler;

pub use builder::{SessionBuilder, SessionConfig};
pub use session::{OpenSummary, SNMP_TRAP_OID, Session, SessionHandle, SessionState};
