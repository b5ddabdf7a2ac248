//! Answers to master-initiated PDUs.
//!
//! Everything here is synchronous: the session loop decodes a PDU, calls
//! [`dispatch`], and writes the Response (if any).

use bytes::Bytes;

use crate::error::ErrorStatus;
use crate::handler::{GetNextResult, Response};
use crate::oid::Oid;
use crate::pdu::{Header, Pdu, SearchRange};
use crate::registry::Registry;
use crate::varbind::VarBind;

use super::set_handler::SetCoordinator;

/// Build the Response to a master request. `None` for PDUs that are not
/// answered (CleanupSet).
pub(crate) fn dispatch(
    registry: &Registry,
    sets: &mut SetCoordinator,
    header: &Header,
    pdu: &Pdu,
) -> Option<Response> {
    if let Some(context) = pdu.context()
        && !registry.has_context(Some(context))
        && matches!(
            pdu,
            Pdu::Get { .. } | Pdu::GetNext { .. } | Pdu::GetBulk { .. } | Pdu::TestSet { .. }
        )
    {
        tracing::debug!(
            agentx.packet_id = header.packet_id,
            context = %String::from_utf8_lossy(context),
            "request for an unknown context"
        );
        return Some(Response::error(ErrorStatus::UnsupportedContext, 0, Vec::new()));
    }

    let response = match pdu {
        Pdu::Get { context, ranges } => {
            let varbinds = ranges
                .iter()
                .map(|range| {
                    let value = registry.lookup(context.as_ref(), &range.start).into_value();
                    VarBind::new(range.start.clone(), value)
                })
                .collect();
            Response::success(varbinds)
        }
        Pdu::GetNext { context, ranges } => {
            let varbinds = ranges
                .iter()
                .map(|range| get_next(registry, context.as_ref(), range))
                .collect();
            Response::success(varbinds)
        }
        Pdu::GetBulk {
            context,
            non_repeaters,
            max_repetitions,
            ranges,
        } => Response::success(get_bulk(
            registry,
            context.as_ref(),
            *non_repeaters as usize,
            *max_repetitions as usize,
            ranges,
        )),
        Pdu::TestSet { context, varbinds } => {
            sets.test_set(registry, header.transaction_id, context.as_ref(), varbinds)
        }
        Pdu::CommitSet => sets.commit_set(header.transaction_id),
        Pdu::UndoSet => sets.undo_set(header.transaction_id),
        Pdu::CleanupSet => {
            sets.cleanup_set(header.transaction_id);
            return None;
        }
        Pdu::Ping { .. } => Response::success(Vec::new()),
        Pdu::Open { .. }
        | Pdu::Close { .. }
        | Pdu::Register { .. }
        | Pdu::Unregister { .. }
        | Pdu::Notify { .. }
        | Pdu::AddAgentCaps { .. }
        | Pdu::RemoveAgentCaps { .. }
        | Pdu::Response { .. } => {
            tracing::warn!(
                agentx.packet_id = header.packet_id,
                pdu_type = %header.pdu_type,
                "master sent a PDU a subagent does not handle"
            );
            Response::error(ErrorStatus::ProcessingError, 0, Vec::new())
        }
    };
    Some(response)
}

fn get_next(registry: &Registry, context: Option<&Bytes>, range: &SearchRange) -> VarBind {
    match registry.lookup_next(context, &range.start, range.include, &range.end) {
        GetNextResult::Value(vb) => vb,
        GetNextResult::EndOfMibView => VarBind::end_of_mib_view(range.start.clone()),
    }
}

/// GetBulk (RFC 2741 §7.2.3.2).
///
/// The first `non_repeaters` ranges are answered like GetNext. The others
/// are walked `max_repetitions` times, interleaved per repetition. A range
/// that runs out yields `endOfMibView` for its remaining repetitions; the
/// walk stops after the first repetition in which every range has ended.
fn get_bulk(
    registry: &Registry,
    context: Option<&Bytes>,
    non_repeaters: usize,
    max_repetitions: usize,
    ranges: &[SearchRange],
) -> Vec<VarBind> {
    let split = non_repeaters.min(ranges.len());
    let (singles, repeaters) = ranges.split_at(split);

    let mut varbinds: Vec<VarBind> = singles
        .iter()
        .map(|range| get_next(registry, context, range))
        .collect();

    struct Cursor<'a> {
        oid: Oid,
        include: bool,
        end: &'a Oid,
        done: bool,
    }
    let mut cursors: Vec<Cursor<'_>> = repeaters
        .iter()
        .map(|range| Cursor {
            oid: range.start.clone(),
            include: range.include,
            end: &range.end,
            done: false,
        })
        .collect();

    for _ in 0..max_repetitions {
        if cursors.is_empty() || cursors.iter().all(|c| c.done) {
            break;
        }
        for cursor in &mut cursors {
            if cursor.done {
                varbinds.push(VarBind::end_of_mib_view(cursor.oid.clone()));
                continue;
            }
            match registry.lookup_next(context, &cursor.oid, cursor.include, cursor.end) {
                GetNextResult::Value(vb) => {
                    cursor.oid = vb.oid.clone();
                    cursor.include = false;
                    varbinds.push(vb);
                }
                GetNextResult::EndOfMibView => {
                    cursor.done = true;
                    varbinds.push(VarBind::end_of_mib_view(cursor.oid.clone()));
                }
            }
        }
    }
    varbinds
}
