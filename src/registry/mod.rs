//! MIB registry.
//!
//! The registry maps OIDs to scalars and tables, per context. Entries in one
//! context never overlap: a scalar owns exactly its instance OID, a table owns
//! the subtree under its entry OID. Lookups resolve incoming Get, GetNext and
//! TestSet varbinds; [`Registry::registrations`] lists what the session
//! announces to the master agent, in ascending (context, OID) order.
//!
//! # Example
//!
//! ```rust
//! use async_agentx::binding::ObjectSpec;
//! use async_agentx::handler::GetResult;
//! use async_agentx::oid;
//! use async_agentx::registry::Registry;
//! use async_agentx::value::Value;
//!
//! let registry = Registry::new();
//! let uptime = registry
//!     .register_scalar(oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0), ObjectSpec::timeticks(0))
//!     .unwrap();
//! uptime.set(Value::TimeTicks(100)).unwrap();
//!
//! assert_eq!(
//!     registry.lookup(None, &oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0)),
//!     GetResult::Value(Value::TimeTicks(100))
//! );
//! ```

mod index;
mod table;

pub use index::{IndexType, IndexValue, decode_index, encode_index};
pub use table::{RowHandle, TableHandle, TableSpec};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::binding::{Access, BindingHandle, ObjectSpec};
use crate::error::{Error, Result};
use crate::handler::{GetNextResult, GetResult, SetResult};
use crate::oid::Oid;
use crate::util::lock;
use crate::value::{Value, ValueType};
use crate::varbind::VarBind;

/// A subtree the session registers with the master agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Registration {
    /// Non-default context, if any.
    pub context: Option<Bytes>,
    /// Registered OID.
    pub subtree: Oid,
    /// `true` for scalars: the subtree is a fully qualified instance.
    pub instance: bool,
}

/// Snapshot of one registered instance, from [`Registry::registered`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredObject {
    pub context: Option<Bytes>,
    pub oid: Oid,
    pub value_type: ValueType,
    pub access: Access,
    pub value: Value,
}

impl fmt::Display for RegisteredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] ", String::from_utf8_lossy(context))?;
        }
        write!(f, "{} = {}: {}", self.oid, self.value_type, self.value)
    }
}

#[derive(Clone)]
enum Entry {
    Scalar(BindingHandle),
    Table(TableHandle),
}

type Tree = BTreeMap<Oid, Entry>;

/// Shared, ordered registry of scalars and tables.
///
/// Cloning is cheap; clones refer to the same registry.
#[derive(Clone, Default)]
pub struct Registry {
    contexts: Arc<Mutex<BTreeMap<Option<Bytes>, Tree>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.registrations())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scalar instance in the default context.
    pub fn register_scalar(&self, oid: Oid, spec: ObjectSpec) -> Result<BindingHandle> {
        self.register_scalar_in(None, oid, spec)
    }

    /// Register a scalar instance in `context` (`None` for the default
    /// context).
    pub fn register_scalar_in(
        &self,
        context: Option<Bytes>,
        oid: Oid,
        spec: ObjectSpec,
    ) -> Result<BindingHandle> {
        oid.validate_length()?;
        let binding = BindingHandle::new(oid.clone(), spec)?;
        let mut contexts = lock(&self.contexts);
        if let Some(tree) = contexts.get(&context) {
            check_overlap(tree, &oid)?;
        }
        contexts
            .entry(context)
            .or_default()
            .insert(oid, Entry::Scalar(binding.clone()));
        tracing::debug!(agentx.oid = %binding.oid(), "registered scalar");
        Ok(binding)
    }

    /// Register a table at its entry OID in the default context.
    pub fn register_table(&self, base: Oid, spec: TableSpec) -> Result<TableHandle> {
        self.register_table_in(None, base, spec)
    }

    /// Register a table in `context`. A row-count scalar, if `spec` names
    /// one, is registered alongside it.
    pub fn register_table_in(
        &self,
        context: Option<Bytes>,
        base: Oid,
        spec: TableSpec,
    ) -> Result<TableHandle> {
        base.validate_length()?;
        spec.validate()?;
        let row_count = match &spec.row_count {
            Some(oid) if oid.starts_with(&base) || base.starts_with(oid) => {
                return Err(Error::Overlap {
                    oid: oid.clone(),
                    existing: base,
                });
            }
            Some(oid) => {
                oid.validate_length()?;
                Some(BindingHandle::new(oid.clone(), ObjectSpec::unsigned32(0))?)
            }
            None => None,
        };

        let mut contexts = lock(&self.contexts);
        if let Some(tree) = contexts.get(&context) {
            check_overlap(tree, &base)?;
            if let Some(count) = &row_count {
                check_overlap(tree, count.oid())?;
            }
        }

        let tree = contexts.entry(context).or_default();
        let table = TableHandle::new(base.clone(), spec, row_count.clone());
        if let Some(count) = row_count {
            tree.insert(count.oid().clone(), Entry::Scalar(count));
        }
        tree.insert(base, Entry::Table(table.clone()));
        tracing::debug!(agentx.oid = %table.base(), "registered table");
        Ok(table)
    }

    /// Remove the entry registered at `oid` in the default context.
    pub fn unregister(&self, oid: &Oid) -> Result<Registration> {
        self.unregister_in(None, oid)
    }

    /// Remove the entry registered at `oid` in `context`. Removing a table
    /// also removes its row-count scalar.
    pub fn unregister_in(&self, context: Option<Bytes>, oid: &Oid) -> Result<Registration> {
        let mut contexts = lock(&self.contexts);
        let tree = contexts
            .get_mut(&context)
            .ok_or_else(|| Error::NotFound { oid: oid.clone() })?;
        let entry = tree
            .remove(oid)
            .ok_or_else(|| Error::NotFound { oid: oid.clone() })?;

        if let Entry::Table(table) = &entry
            && let Some(count) = table.row_count_binding()
            && matches!(tree.get(count.oid()), Some(Entry::Scalar(b)) if b.ptr_eq(&count))
        {
            tree.remove(count.oid());
        }
        if tree.is_empty() {
            contexts.remove(&context);
        }
        tracing::debug!(agentx.oid = %oid, "unregistered");
        Ok(Registration {
            context,
            subtree: oid.clone(),
            instance: matches!(entry, Entry::Scalar(_)),
        })
    }

    /// Exact lookup for Get.
    ///
    /// `NoSuchObject` when no entry covers `oid`; `NoSuchInstance` when a
    /// table covers it but the row or cell does not exist.
    pub fn lookup(&self, context: Option<&Bytes>, oid: &Oid) -> GetResult {
        let contexts = lock(&self.contexts);
        let Some(tree) = contexts.get(&context.cloned()) else {
            return GetResult::NoSuchObject;
        };
        match covering(tree, oid) {
            Some((key, Entry::Scalar(binding))) if key == oid => GetResult::Value(binding.get()),
            Some((_, Entry::Scalar(_))) => GetResult::NoSuchInstance,
            Some((_, Entry::Table(table))) => table.get(oid),
            None => GetResult::NoSuchObject,
        }
    }

    /// Smallest registered instance greater than `oid` (or equal, when
    /// `include` is set) and below `end` (unless `end` is empty).
    pub fn lookup_next(
        &self,
        context: Option<&Bytes>,
        oid: &Oid,
        include: bool,
        end: &Oid,
    ) -> GetNextResult {
        let found = {
            let contexts = lock(&self.contexts);
            contexts
                .get(&context.cloned())
                .and_then(|tree| next_instance(tree, oid, include))
        };
        match found {
            Some(binding) if end.is_empty() || binding.oid() < end => {
                GetNextResult::Value(VarBind::new(binding.oid().clone(), binding.get()))
            }
            _ => GetNextResult::EndOfMibView,
        }
    }

    /// Resolve the binding a master write targets.
    ///
    /// Unknown OIDs are `NotWritable`; a missing row of a registered table
    /// is `NoCreation`.
    pub(crate) fn resolve_for_set(
        &self,
        context: Option<&Bytes>,
        oid: &Oid,
    ) -> std::result::Result<BindingHandle, SetResult> {
        let contexts = lock(&self.contexts);
        let tree = contexts
            .get(&context.cloned())
            .ok_or(SetResult::NotWritable)?;
        match covering(tree, oid) {
            Some((key, Entry::Scalar(binding))) if key == oid => Ok(binding.clone()),
            Some((_, Entry::Table(table))) => table.cell_for_set(oid),
            _ => Err(SetResult::NotWritable),
        }
    }

    /// Whether `context` is known (has at least one entry).
    pub fn has_context(&self, context: Option<&Bytes>) -> bool {
        lock(&self.contexts).contains_key(&context.cloned())
    }

    /// The subtrees to register with the master, in (context, OID) order.
    pub fn registrations(&self) -> Vec<Registration> {
        let contexts = lock(&self.contexts);
        contexts
            .iter()
            .flat_map(|(context, tree)| {
                tree.iter().map(move |(oid, entry)| Registration {
                    context: context.clone(),
                    subtree: oid.clone(),
                    instance: matches!(entry, Entry::Scalar(_)),
                })
            })
            .collect()
    }

    /// The registration covering `oid` in `context`, if any.
    pub(crate) fn registration_at(&self, context: Option<&Bytes>, oid: &Oid) -> Option<Registration> {
        let contexts = lock(&self.contexts);
        let entry = contexts.get(&context.cloned())?.get(oid)?;
        Some(Registration {
            context: context.cloned(),
            subtree: oid.clone(),
            instance: matches!(entry, Entry::Scalar(_)),
        })
    }

    /// OID of the row-count scalar owned by the table at `oid`.
    pub(crate) fn table_row_count(&self, context: Option<&Bytes>, oid: &Oid) -> Option<Oid> {
        let contexts = lock(&self.contexts);
        match contexts.get(&context.cloned())?.get(oid)? {
            Entry::Table(table) => table.row_count_binding().map(|b| b.oid().clone()),
            Entry::Scalar(_) => None,
        }
    }

    /// Snapshot of every registered instance with its current value.
    pub fn registered(&self) -> Vec<RegisteredObject> {
        let entries: Vec<(Option<Bytes>, Entry)> = {
            let contexts = lock(&self.contexts);
            contexts
                .iter()
                .flat_map(|(context, tree)| {
                    tree.values().map(move |entry| (context.clone(), entry.clone()))
                })
                .collect()
        };

        let mut objects = Vec::new();
        for (context, entry) in entries {
            let bindings = match entry {
                Entry::Scalar(binding) => vec![binding],
                Entry::Table(table) => table.cells(),
            };
            objects.extend(bindings.into_iter().map(|b| RegisteredObject {
                context: context.clone(),
                oid: b.oid().clone(),
                value_type: b.value_type(),
                access: b.access(),
                value: b.get(),
            }));
        }
        objects
    }

    /// Number of entries (scalars and tables) over all contexts.
    pub fn len(&self) -> usize {
        lock(&self.contexts).values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reject `oid` if it equals, contains or lies inside an existing entry.
fn check_overlap(tree: &Tree, oid: &Oid) -> Result<()> {
    // Entries never overlap, so only the neighbours on each side matter.
    if let Some((existing, _)) = tree.range::<Oid, _>(..=oid).next_back()
        && oid.starts_with(existing)
    {
        return Err(Error::Overlap {
            oid: oid.clone(),
            existing: existing.clone(),
        });
    }
    if let Some((existing, _)) = tree.range::<Oid, _>(oid..).next()
        && existing.starts_with(oid)
    {
        return Err(Error::Overlap {
            oid: oid.clone(),
            existing: existing.clone(),
        });
    }
    Ok(())
}

/// The entry whose key is `oid` or a prefix of it.
fn covering<'a>(tree: &'a Tree, oid: &Oid) -> Option<(&'a Oid, &'a Entry)> {
    tree.range::<Oid, _>(..=oid)
        .next_back()
        .filter(|(key, _)| oid.starts_with(key))
}

fn next_instance(tree: &Tree, oid: &Oid, include: bool) -> Option<BindingHandle> {
    // An entry sorting before `oid` can only hold later instances if it
    // covers `oid`.
    let start = match covering(tree, oid) {
        Some((key, _)) => key.clone(),
        None => oid.clone(),
    };
    tree.range(start..).find_map(|(key, entry)| match entry {
        Entry::Scalar(binding) => {
            (key > oid || (include && key == oid)).then(|| binding.clone())
        }
        Entry::Table(table) => table.next(oid, include),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn enterprise(arcs: &[u32]) -> Oid {
        oid!(1, 3, 6, 1, 4, 1, 99999).concat(arcs)
    }

    #[test]
    fn test_lookup_scalar() {
        let registry = Registry::new();
        registry
            .register_scalar(oid!(1, 3, 6, 1, 4, 1, 0, 1), ObjectSpec::integer32(42).read_write())
            .unwrap();
        assert_eq!(
            registry.lookup(None, &oid!(1, 3, 6, 1, 4, 1, 0, 1)),
            GetResult::Value(Value::Integer(42))
        );
        assert_eq!(
            registry.lookup(None, &oid!(1, 3, 6, 1, 4, 1, 0, 2)),
            GetResult::NoSuchObject
        );
        assert_eq!(
            registry.lookup(None, &oid!(1, 3, 6, 1, 4, 1, 0, 1, 0)),
            GetResult::NoSuchInstance
        );
    }

    #[test]
    fn test_lookup_next_between_entries() {
        let registry = Registry::new();
        let a = enterprise(&[1, 0]);
        let b = enterprise(&[2, 0]);
        let c = enterprise(&[3, 0]);
        for (oid, v) in [(&a, 1), (&b, 2), (&c, 3)] {
            registry.register_scalar(oid.clone(), ObjectSpec::integer32(v)).unwrap();
        }

        let next = registry.lookup_next(None, &a, false, &Oid::empty());
        assert_eq!(next, GetNextResult::Value(VarBind::new(b.clone(), Value::Integer(2))));

        // include returns the start itself
        let next = registry.lookup_next(None, &a, true, &Oid::empty());
        assert_eq!(next.into_option().unwrap().oid, a);

        // end bound is exclusive
        let next = registry.lookup_next(None, &a, false, &b);
        assert!(next.is_end_of_mib_view());

        let next = registry.lookup_next(None, &c, false, &Oid::empty());
        assert!(next.is_end_of_mib_view());
    }

    #[test]
    fn test_lookup_next_below_scalar() {
        let registry = Registry::new();
        registry
            .register_scalar(oid!(1, 3, 6, 1, 4, 1, 0, 1), ObjectSpec::integer32(42))
            .unwrap();
        let next = registry.lookup_next(None, &oid!(1, 3, 6, 1, 4, 1, 0, 0), false, &Oid::empty());
        assert_eq!(
            next,
            GetNextResult::Value(VarBind::new(oid!(1, 3, 6, 1, 4, 1, 0, 1), Value::Integer(42)))
        );
    }

    #[test]
    fn test_lookup_next_into_and_out_of_table() {
        let registry = Registry::new();
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1))
            .unwrap();
        let table = registry
            .register_table(
                enterprise(&[2, 1]),
                TableSpec::new()
                    .index(IndexType::Integer32)
                    .column(2, ObjectSpec::integer32(0)),
            )
            .unwrap();
        registry
            .register_scalar(enterprise(&[3, 0]), ObjectSpec::integer32(3))
            .unwrap();
        table.add_row(&[5.into()]).unwrap();

        let next = registry.lookup_next(None, &enterprise(&[1, 0]), false, &Oid::empty());
        assert_eq!(next.into_option().unwrap().oid, enterprise(&[2, 1, 2, 5]));

        let next = registry.lookup_next(None, &enterprise(&[2, 1, 2, 5]), false, &Oid::empty());
        assert_eq!(next.into_option().unwrap().oid, enterprise(&[3, 0]));

        // an empty table is skipped
        table.clear();
        let next = registry.lookup_next(None, &enterprise(&[1, 0]), false, &Oid::empty());
        assert_eq!(next.into_option().unwrap().oid, enterprise(&[3, 0]));
    }

    #[test]
    fn test_overlap_rejected() {
        let registry = Registry::new();
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(0))
            .unwrap();
        assert!(matches!(
            registry.register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(0)),
            Err(Error::Overlap { .. })
        ));
        // table over the scalar
        let spec = TableSpec::new()
            .index(IndexType::Integer32)
            .column(1, ObjectSpec::integer32(0));
        assert!(matches!(
            registry.register_table(enterprise(&[1]), spec.clone()),
            Err(Error::Overlap { .. })
        ));

        registry.register_table(enterprise(&[2, 1]), spec).unwrap();
        // scalar inside the table subtree
        assert!(matches!(
            registry.register_scalar(enterprise(&[2, 1, 1, 7]), ObjectSpec::integer32(0)),
            Err(Error::Overlap { .. })
        ));
        // neighbours are fine
        registry
            .register_scalar(enterprise(&[2, 2]), ObjectSpec::integer32(0))
            .unwrap();
    }

    #[test]
    fn test_contexts_are_separate() {
        let registry = Registry::new();
        let ctx = Some(Bytes::from_static(b"blue"));
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(1))
            .unwrap();
        registry
            .register_scalar_in(ctx.clone(), enterprise(&[1, 0]), ObjectSpec::integer32(2))
            .unwrap();

        assert_eq!(
            registry.lookup(ctx.as_ref(), &enterprise(&[1, 0])),
            GetResult::Value(Value::Integer(2))
        );
        assert_eq!(
            registry.lookup(Some(&Bytes::from_static(b"red")), &enterprise(&[1, 0])),
            GetResult::NoSuchObject
        );
        let regs = registry.registrations();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].context, None);
        assert_eq!(regs[1].context, ctx);
    }

    #[test]
    fn test_registrations_in_oid_order() {
        let registry = Registry::new();
        for arc in [3, 1, 2] {
            registry
                .register_scalar(enterprise(&[arc, 0]), ObjectSpec::integer32(0))
                .unwrap();
        }
        let subtrees: Vec<Oid> = registry.registrations().into_iter().map(|r| r.subtree).collect();
        assert_eq!(
            subtrees,
            vec![enterprise(&[1, 0]), enterprise(&[2, 0]), enterprise(&[3, 0])]
        );
        assert!(registry.registrations().iter().all(|r| r.instance));
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(0))
            .unwrap();
        let reg = registry.unregister(&enterprise(&[1, 0])).unwrap();
        assert!(reg.instance);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister(&enterprise(&[1, 0])),
            Err(Error::NotFound { .. })
        ));
        // the OID is free again
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(0))
            .unwrap();
    }

    #[test]
    fn test_row_count_registered_with_table() {
        let registry = Registry::new();
        let table = registry
            .register_table(
                enterprise(&[2, 1]),
                TableSpec::new()
                    .index(IndexType::Integer32)
                    .column(2, ObjectSpec::integer32(0))
                    .row_count(enterprise(&[3, 0])),
            )
            .unwrap();
        table.add_row(&[1.into()]).unwrap();
        assert_eq!(
            registry.lookup(None, &enterprise(&[3, 0])),
            GetResult::Value(Value::Gauge32(1))
        );
        assert_eq!(registry.len(), 2);

        registry.unregister(&enterprise(&[2, 1])).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_row_count_inside_table_rejected() {
        let registry = Registry::new();
        let result = registry.register_table(
            enterprise(&[2, 1]),
            TableSpec::new()
                .index(IndexType::Integer32)
                .column(2, ObjectSpec::integer32(0))
                .row_count(enterprise(&[2, 1, 9])),
        );
        assert!(matches!(result, Err(Error::Overlap { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_for_set() {
        let registry = Registry::new();
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::integer32(0).read_write())
            .unwrap();
        assert!(registry.resolve_for_set(None, &enterprise(&[1, 0])).is_ok());
        assert_eq!(
            registry.resolve_for_set(None, &enterprise(&[9, 0])).unwrap_err(),
            SetResult::NotWritable
        );
    }

    #[test]
    fn test_registered_dump() {
        let registry = Registry::new();
        registry
            .register_scalar(enterprise(&[1, 0]), ObjectSpec::display_string("hello"))
            .unwrap();
        let table = registry
            .register_table(
                enterprise(&[2, 1]),
                TableSpec::new()
                    .index(IndexType::Integer32)
                    .column(2, ObjectSpec::integer32(7)),
            )
            .unwrap();
        table.add_row(&[1.into()]).unwrap();

        let dump = registry.registered();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].value, Value::from("hello"));
        assert_eq!(dump[1].oid, enterprise(&[2, 1, 2, 1]));
        assert_eq!(dump[1].value, Value::Integer(7));
        assert_eq!(
            dump[0].to_string(),
            format!("{} = DisplayString: hello", enterprise(&[1, 0]))
        );
    }
}
