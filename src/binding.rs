//! Variable bindings: the values behind registered objects.
//!
//! A [`BindingHandle`] is shared between the registry (which answers the
//! master agent) and the application (which updates values). Application
//! writes go through [`BindingHandle::set`] and friends; master writes go
//! through the set coordinator, which uses [`BindingHandle::test`] before
//! anything is modified.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::handler::SetResult;
use crate::oid::{MAX_OID_LEN, Oid};
use crate::util::lock;
use crate::value::{Value, ValueType};

/// Default maximum size of OCTET STRING and Opaque values.
pub const MAX_STRING_SIZE: usize = 1024;

/// Maximum size of a DisplayString (RFC 2579).
pub const MAX_DISPLAY_STRING_SIZE: usize = 255;

/// TruthValue `true` (RFC 2579).
pub const TRUTH_TRUE: i32 = 1;

/// TruthValue `false` (RFC 2579).
pub const TRUTH_FALSE: i32 = 2;

/// Access mode as seen by the master agent.
///
/// Application writes are allowed regardless of access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    #[default]
    ReadOnly,
    ReadWrite,
}

/// Value constraint beyond the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Inclusive numeric range (integer types).
    Range { min: i64, max: i64 },
    /// Inclusive length range in octets (string types).
    Size { min: usize, max: usize },
}

/// Hook consulted for every master write, at test and again at commit.
pub type Validator = Arc<dyn Fn(&Value) -> SetResult + Send + Sync>;

/// Definition of an object: type, access, initial value and checks.
///
/// ```rust
/// use async_agentx::binding::ObjectSpec;
///
/// let spec = ObjectSpec::integer32(5).read_write().range(0, 10);
/// ```
#[derive(Clone)]
pub struct ObjectSpec {
    pub(crate) value_type: ValueType,
    pub(crate) access: Access,
    pub(crate) initial: Value,
    pub(crate) constraint: Option<Constraint>,
    pub(crate) validator: Option<Validator>,
}

impl std::fmt::Debug for ObjectSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSpec")
            .field("value_type", &self.value_type)
            .field("access", &self.access)
            .field("initial", &self.initial)
            .field("constraint", &self.constraint)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl ObjectSpec {
    /// Read-only object of `value_type` with its zero value.
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            access: Access::ReadOnly,
            initial: value_type.default_value(),
            constraint: None,
            validator: None,
        }
    }

    pub fn integer32(initial: i32) -> Self {
        Self::new(ValueType::Integer32).initial(Value::Integer(initial))
    }

    pub fn unsigned32(initial: u32) -> Self {
        Self::new(ValueType::Unsigned32).initial(Value::Gauge32(initial))
    }

    pub fn counter32(initial: u32) -> Self {
        Self::new(ValueType::Counter32).initial(Value::Counter32(initial))
    }

    pub fn counter64(initial: u64) -> Self {
        Self::new(ValueType::Counter64).initial(Value::Counter64(initial))
    }

    pub fn timeticks(initial: u32) -> Self {
        Self::new(ValueType::TimeTicks).initial(Value::TimeTicks(initial))
    }

    pub fn ip_address(initial: Ipv4Addr) -> Self {
        Self::new(ValueType::IpAddress).initial(Value::from(initial))
    }

    pub fn octet_string(initial: impl Into<Bytes>) -> Self {
        Self::new(ValueType::OctetString).initial(Value::OctetString(initial.into()))
    }

    pub fn display_string(initial: &str) -> Self {
        Self::new(ValueType::DisplayString).initial(Value::from(initial))
    }

    pub fn object_identifier(initial: Oid) -> Self {
        Self::new(ValueType::ObjectIdentifier).initial(Value::ObjectIdentifier(initial))
    }

    /// TruthValue: an Integer32 restricted to 1 (true) and 2 (false).
    pub fn truth_value(initial: bool) -> Self {
        Self::integer32(if initial { TRUTH_TRUE } else { TRUTH_FALSE })
            .range(TRUTH_TRUE as i64, TRUTH_FALSE as i64)
    }

    /// Float carried in an Opaque (net-snmp `ASN_OPAQUE_FLOAT`).
    pub fn float(initial: f32) -> Self {
        Self::new(ValueType::Opaque).initial(Value::opaque_float(initial))
    }

    /// Set the initial value.
    pub fn initial(mut self, value: Value) -> Self {
        self.initial = value;
        self
    }

    /// Allow the master agent to write this object.
    pub fn read_write(mut self) -> Self {
        self.access = Access::ReadWrite;
        self
    }

    /// Set the access mode.
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Restrict numeric values to `min..=max`.
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.constraint = Some(Constraint::Range { min, max });
        self
    }

    /// Restrict string lengths to `min..=max` octets.
    pub fn size(mut self, min: usize, max: usize) -> Self {
        self.constraint = Some(Constraint::Size { min, max });
        self
    }

    /// Install a validator for master writes.
    pub fn validator(
        mut self,
        f: impl Fn(&Value) -> SetResult + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

struct Inner {
    oid: Oid,
    value_type: ValueType,
    access: Access,
    constraint: Option<Constraint>,
    validator: Option<Validator>,
    value: Mutex<Value>,
}

/// Shared handle to one object instance.
///
/// Cloning is cheap; all clones refer to the same value.
#[derive(Clone)]
pub struct BindingHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BindingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingHandle")
            .field("oid", &self.inner.oid)
            .field("value_type", &self.inner.value_type)
            .field("access", &self.inner.access)
            .field("value", &*lock(&self.inner.value))
            .finish()
    }
}

impl BindingHandle {
    /// Create a binding. The initial value must pass the type and
    /// constraint checks.
    pub(crate) fn new(oid: Oid, spec: ObjectSpec) -> Result<Self> {
        let ObjectSpec {
            value_type,
            access,
            initial,
            constraint,
            validator,
        } = spec;
        let handle = Self {
            inner: Arc::new(Inner {
                oid,
                value_type,
                access,
                constraint,
                validator,
                value: Mutex::new(Value::Null),
            }),
        };
        handle.check_shape(&initial).map_err(|r| handle.value_error(r))?;
        *lock(&handle.inner.value) = initial;
        Ok(handle)
    }

    /// Instance OID of this binding.
    pub fn oid(&self) -> &Oid {
        &self.inner.oid
    }

    pub fn value_type(&self) -> ValueType {
        self.inner.value_type
    }

    pub fn access(&self) -> Access {
        self.inner.access
    }

    /// Current value.
    pub fn get(&self) -> Value {
        lock(&self.inner.value).clone()
    }

    /// Application write. Type and constraint checked; the access mode and
    /// the validator hook do not apply.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.check_shape(&value).map_err(|r| self.value_error(r))?;
        *lock(&self.inner.value) = value;
        Ok(())
    }

    /// Add `by` to a Counter32/Counter64 (wrapping) or Gauge32 (saturating
    /// at `u32::MAX`). Returns the new value.
    pub fn increment(&self, by: u64) -> Result<Value> {
        let mut guard = lock(&self.inner.value);
        let next = match &*guard {
            Value::Counter32(v) => Value::Counter32((*v as u64).wrapping_add(by) as u32),
            Value::Counter64(v) => Value::Counter64(v.wrapping_add(by)),
            Value::Gauge32(v) => {
                Value::Gauge32((*v as u64).saturating_add(by).min(u32::MAX as u64) as u32)
            }
            _ => return Err(self.value_error(SetResult::WrongType)),
        };
        if let Err(r) = self.check_constraint(&next) {
            return Err(self.value_error(r));
        }
        *guard = next.clone();
        Ok(next)
    }

    /// Write a TruthValue (1 = true, 2 = false).
    pub fn set_bool(&self, value: bool) -> Result<()> {
        self.set(Value::Integer(if value { TRUTH_TRUE } else { TRUTH_FALSE }))
    }

    /// Read a TruthValue. `None` if the current value is not 1 or 2.
    pub fn get_bool(&self) -> Option<bool> {
        match self.get() {
            Value::Integer(TRUTH_TRUE) => Some(true),
            Value::Integer(TRUTH_FALSE) => Some(false),
            _ => None,
        }
    }

    /// Check a master write: access, type, constraint, validator.
    pub(crate) fn test(&self, value: &Value) -> SetResult {
        if self.inner.access != Access::ReadWrite {
            return SetResult::NotWritable;
        }
        if let Err(r) = self.check_shape(value) {
            return r;
        }
        self.validate(value)
    }

    /// Run only the validator hook.
    pub(crate) fn validate(&self, value: &Value) -> SetResult {
        match &self.inner.validator {
            Some(f) => f(value),
            None => SetResult::Ok,
        }
    }

    /// Whether both handles refer to the same binding.
    pub(crate) fn ptr_eq(&self, other: &BindingHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Store `value` and return the prior value. No checks.
    pub(crate) fn replace(&self, value: Value) -> Value {
        std::mem::replace(&mut *lock(&self.inner.value), value)
    }

    fn value_error(&self, result: SetResult) -> Error {
        Error::Value {
            oid: Some(self.inner.oid.clone()),
            status: result.to_error_status(),
        }
    }

    fn check_shape(&self, value: &Value) -> std::result::Result<(), SetResult> {
        let ty = self.inner.value_type;
        if !ty.matches(value) {
            return Err(SetResult::WrongType);
        }
        match (ty, value) {
            (ValueType::DisplayString, Value::OctetString(data)) => {
                if data.len() > MAX_DISPLAY_STRING_SIZE {
                    return Err(SetResult::WrongLength);
                }
                let printable = data
                    .iter()
                    .all(|b| b.is_ascii() && (!b.is_ascii_control() || b.is_ascii_whitespace()));
                if !printable {
                    return Err(SetResult::WrongValue);
                }
            }
            (_, Value::OctetString(data) | Value::Opaque(data)) => {
                let max = match self.inner.constraint {
                    Some(Constraint::Size { max, .. }) => max,
                    _ => MAX_STRING_SIZE,
                };
                if data.len() > max {
                    return Err(SetResult::WrongLength);
                }
            }
            (_, Value::ObjectIdentifier(oid)) if oid.len() > MAX_OID_LEN => {
                return Err(SetResult::WrongLength);
            }
            _ => {}
        }
        self.check_constraint(value)
    }

    fn check_constraint(&self, value: &Value) -> std::result::Result<(), SetResult> {
        match self.inner.constraint {
            Some(Constraint::Range { min, max }) => match value.as_i64() {
                Some(v) if v < min || v > max => Err(SetResult::WrongValue),
                _ => Ok(()),
            },
            Some(Constraint::Size { min, max }) => match value {
                Value::OctetString(data) | Value::Opaque(data)
                    if data.len() < min || data.len() > max =>
                {
                    Err(SetResult::WrongLength)
                }
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;
    use crate::oid;

    fn binding(spec: ObjectSpec) -> BindingHandle {
        BindingHandle::new(oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0), spec).unwrap()
    }

    #[test]
    fn test_get_and_set() {
        let b = binding(ObjectSpec::integer32(3));
        assert_eq!(b.get(), Value::Integer(3));
        b.set(7).unwrap();
        assert_eq!(b.get(), Value::Integer(7));
        // read-only does not restrict the application
        assert_eq!(b.access(), Access::ReadOnly);
    }

    #[test]
    fn test_object_identifier_length() {
        let b = binding(ObjectSpec::object_identifier(oid!(1, 3)).read_write());
        let long = Value::ObjectIdentifier(Oid::new(0..(MAX_OID_LEN as u32 + 1)));

        let err = b.set(long.clone()).unwrap_err();
        assert!(matches!(
            err,
            Error::Value {
                status: ErrorStatus::WrongLength,
                ..
            }
        ));
        assert_eq!(b.test(&long), SetResult::WrongLength);
        assert_eq!(b.get(), Value::ObjectIdentifier(oid!(1, 3)));

        let max = Value::ObjectIdentifier(Oid::new(0..MAX_OID_LEN as u32));
        assert_eq!(b.test(&max), SetResult::Ok);
        b.set(max.clone()).unwrap();
        assert_eq!(b.get(), max);

        let oversize = ObjectSpec::object_identifier(Oid::new(0..300));
        assert!(BindingHandle::new(oid!(1, 3, 6, 1, 4, 1, 99999, 2, 0), oversize).is_err());
    }

    #[test]
    fn test_set_wrong_type() {
        let b = binding(ObjectSpec::integer32(0));
        let err = b.set("nope").unwrap_err();
        assert!(matches!(
            err,
            Error::Value {
                status: ErrorStatus::WrongType,
                ..
            }
        ));
        assert_eq!(b.get(), Value::Integer(0));
    }

    #[test]
    fn test_initial_value_checked() {
        let result = BindingHandle::new(
            oid!(1, 3, 6, 1, 4, 1, 99999, 2, 0),
            ObjectSpec::integer32(50).range(0, 10),
        );
        assert!(matches!(
            result,
            Err(Error::Value {
                status: ErrorStatus::WrongValue,
                ..
            })
        ));
    }

    #[test]
    fn test_counter32_wraps() {
        let b = binding(ObjectSpec::counter32(u32::MAX - 1));
        assert_eq!(b.increment(1).unwrap(), Value::Counter32(u32::MAX));
        assert_eq!(b.increment(3).unwrap(), Value::Counter32(2));
    }

    #[test]
    fn test_counter64_wraps() {
        let b = binding(ObjectSpec::counter64(u64::MAX));
        assert_eq!(b.increment(1).unwrap(), Value::Counter64(0));
    }

    #[test]
    fn test_gauge32_saturates() {
        let b = binding(ObjectSpec::unsigned32(u32::MAX - 2));
        assert_eq!(b.increment(10).unwrap(), Value::Gauge32(u32::MAX));
        assert_eq!(b.increment(1).unwrap(), Value::Gauge32(u32::MAX));
    }

    #[test]
    fn test_increment_wrong_type() {
        let b = binding(ObjectSpec::display_string("x"));
        assert!(b.increment(1).is_err());
    }

    #[test]
    fn test_truth_value() {
        let b = binding(ObjectSpec::truth_value(true));
        assert_eq!(b.get(), Value::Integer(1));
        assert_eq!(b.get_bool(), Some(true));
        b.set_bool(false).unwrap();
        assert_eq!(b.get(), Value::Integer(2));
        assert!(b.set(3).is_err());
    }

    #[test]
    fn test_master_write_checks() {
        let ro = binding(ObjectSpec::integer32(0));
        assert_eq!(ro.test(&Value::Integer(1)), SetResult::NotWritable);

        let rw = binding(ObjectSpec::integer32(0).read_write().range(0, 100));
        assert_eq!(rw.test(&Value::Integer(50)), SetResult::Ok);
        assert_eq!(rw.test(&Value::Integer(101)), SetResult::WrongValue);
        assert_eq!(rw.test(&Value::Gauge32(1)), SetResult::WrongType);
    }

    #[test]
    fn test_string_limits() {
        let s = binding(ObjectSpec::octet_string(Bytes::new()).read_write());
        let long = Value::OctetString(Bytes::from(vec![0u8; MAX_STRING_SIZE + 1]));
        assert_eq!(s.test(&long), SetResult::WrongLength);
        assert!(s.set(long).is_err());

        let sized = binding(
            ObjectSpec::octet_string(Bytes::from_static(b"ab"))
                .read_write()
                .size(2, 4),
        );
        assert_eq!(sized.test(&Value::from("a")), SetResult::WrongLength);
        assert_eq!(sized.test(&Value::from("abcd")), SetResult::Ok);

        let display = binding(ObjectSpec::display_string("").read_write());
        assert_eq!(display.test(&Value::from("ok text")), SetResult::Ok);
        assert_eq!(
            display.test(&Value::OctetString(Bytes::from_static(&[0xC3, 0xA9]))),
            SetResult::WrongValue
        );
        assert_eq!(display.test(&Value::from("x".repeat(256))), SetResult::WrongLength);
    }

    #[test]
    fn test_validator() {
        let b = binding(ObjectSpec::integer32(0).read_write().validator(|v| match v {
            Value::Integer(n) if n % 2 == 0 => SetResult::Ok,
            _ => SetResult::InconsistentValue,
        }));
        assert_eq!(b.test(&Value::Integer(4)), SetResult::Ok);
        assert_eq!(b.test(&Value::Integer(3)), SetResult::InconsistentValue);
        // application writes skip the validator
        b.set(3).unwrap();
    }

    #[test]
    fn test_replace_returns_prior() {
        let b = binding(ObjectSpec::integer32(1));
        assert_eq!(b.replace(Value::Integer(2)), Value::Integer(1));
        assert_eq!(b.get(), Value::Integer(2));
    }

    #[test]
    fn test_float() {
        let b = binding(ObjectSpec::float(1.5));
        assert_eq!(
            b.get().as_opaque(),
            Some(crate::value::OpaqueValue::Float(1.5))
        );
    }
}
