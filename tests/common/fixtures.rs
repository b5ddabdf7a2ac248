//! Common test fixtures and constants.

use std::time::Duration;

use async_agentx::binding::ObjectSpec;
use async_agentx::registry::{IndexType, TableSpec};
use async_agentx::{MasterAddress, Oid, Session, oid};

use super::master::{Listener, master_pair};

// =============================================================================
// Test OIDs
// =============================================================================

/// Session ID every scripted master hands out first.
pub const SESSION_ID: u32 = 7;

/// The read-write Integer32 scalar used by the end-to-end scenarios.
pub fn scalar_oid() -> Oid {
    oid!(1, 3, 6, 1, 4, 1, 0, 1)
}

/// Just below [`scalar_oid`].
pub fn below_scalar() -> Oid {
    oid!(1, 3, 6, 1, 4, 1, 0, 0)
}

/// Private enterprise arc for everything else.
pub fn enterprise(arcs: &[u32]) -> Oid {
    oid!(1, 3, 6, 1, 4, 1, 99999).concat(arcs)
}

/// Entry OID of the interface-like test table.
pub fn if_entry() -> Oid {
    enterprise(&[2, 1])
}

/// Row-count scalar of the interface-like test table.
pub fn if_number() -> Oid {
    enterprise(&[1, 0])
}

// =============================================================================
// Builders
// =============================================================================

/// Table indexed by one Integer32 with a name (2) and a counter (3) column.
pub fn if_table_spec() -> TableSpec {
    TableSpec::new()
        .index(IndexType::Integer32)
        .column(2, ObjectSpec::display_string(""))
        .column(3, ObjectSpec::counter32(0))
        .row_count(if_number())
}

/// A disconnected session wired to a scripted master.
pub fn test_session() -> (Session, Listener) {
    let (connector, listener) = master_pair();
    let session = Session::builder(MasterAddress::default())
        .connector(connector)
        .description("integration test")
        .request_timeout(Duration::from_secs(2))
        .build();
    (session, listener)
}

/// Install a tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
