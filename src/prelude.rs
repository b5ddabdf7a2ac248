//! Prelude module for convenient imports.
//!
//! ```rust,no_run
//! use async_agentx::prelude::*;
//! ```
//!
//! This imports:
//! - Session types: [`Session`], [`SessionHandle`], [`MasterAddress`]
//! - Registration: [`ObjectSpec`], [`TableSpec`], [`IndexType`], [`IndexValue`]
//! - Core types: [`Oid`], [`Value`], [`VarBind`]
//! - Error handling: [`Error`], [`Result`]
//! - The [`oid!`] macro for compile-time OID construction

pub use crate::agent::{Session, SessionHandle};
pub use crate::binding::{Access, BindingHandle, ObjectSpec};
pub use crate::error::{Error, Result};
pub use crate::oid::Oid;
pub use crate::pdu::CloseReason;
pub use crate::registry::{IndexType, IndexValue, TableHandle, TableSpec};
pub use crate::transport::MasterAddress;
pub use crate::value::Value;
pub use crate::varbind::VarBind;

#[doc(no_inline)]
pub use crate::oid;
