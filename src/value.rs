// Cross-boundary values and the attached-value table.
//
// Complex values are never inlined in the wire stream; the scripting side
// parks them in a side table and entries reference them by small integer
// index. Conversion to the native representation is deferred until an index
// is first touched and the result is cached in place, so each index converts
// at most once per request.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::error::{DecodeError, DecodeResult};

// ============================================================================
// Callback Handles
// ============================================================================

/// A native handle for a scripting-side function.
///
/// Cloning shares the underlying function; equality is identity.
#[derive(Clone)]
pub struct CallbackHandle(Arc<dyn Fn(&[HostValue]) + Send + Sync>);

impl CallbackHandle {
    pub fn new(f: impl Fn(&[HostValue]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, args: &[HostValue]) {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callback {:p}>", Arc::as_ptr(&self.0))
    }
}

// ============================================================================
// Host Values
// ============================================================================

/// Native representation of a value that crossed the scripting boundary.
#[derive(Clone, Debug)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<HostValue>),
    Map(HashMap<String, HostValue>),
    Callback(CallbackHandle),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Double(_) => "double",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "array",
            HostValue::Map(_) => "map",
            HostValue::Callback(_) => "callback",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(n) => Some(*n as f64),
            HostValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&CallbackHandle> {
        match self {
            HostValue::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Inspectable form used by `RenderRequest::serialize`. Callbacks are
    /// opaque and render as a placeholder string.
    pub fn to_json(&self) -> JsonValue {
        match self {
            HostValue::Null => JsonValue::Null,
            HostValue::Bool(b) => json!(b),
            HostValue::Int(n) => json!(n),
            HostValue::Double(d) => json!(d),
            HostValue::String(s) => json!(s),
            HostValue::Array(items) => {
                JsonValue::Array(items.iter().map(HostValue::to_json).collect())
            }
            HostValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json());
                }
                JsonValue::Object(map)
            }
            HostValue::Callback(_) => json!("<callback>"),
        }
    }
}

// ============================================================================
// Attached-Value Table
// ============================================================================

/// Source side of the attached-value table: converts the scripting-side
/// value parked at `index` into its native form. Called at most once per
/// index per request.
pub trait AttachedValueSource: Send {
    fn len(&self) -> usize;
    fn convert(&self, index: usize) -> HostValue;
}

struct EmptySource;

impl AttachedValueSource for EmptySource {
    fn len(&self) -> usize {
        0
    }

    fn convert(&self, _index: usize) -> HostValue {
        HostValue::Null
    }
}

/// Ordered table of cross-boundary values referenced by index from entries.
///
/// Slots start unresolved; `resolve` converts from the source on first
/// access and memoizes the result in place. Resolution only ever happens
/// from the thread applying the owning request, so the cache is
/// single-writer: the table is `Send` but deliberately not `Sync`.
pub struct AttachedValueTable {
    source: Box<dyn AttachedValueSource>,
    cache: Vec<OnceCell<HostValue>>,
}

impl AttachedValueTable {
    pub fn new(source: Box<dyn AttachedValueSource>) -> Self {
        let cache = (0..source.len()).map(|_| OnceCell::new()).collect();
        Self { source, cache }
    }

    /// A table with no values; indices always fail range checks.
    pub fn empty() -> Self {
        Self::new(Box::new(EmptySource))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Range check without forcing a conversion. The decoder uses this for
    /// indices whose values stay lazy until application.
    pub fn check_index(&self, index: u32) -> DecodeResult<()> {
        if (index as usize) < self.cache.len() {
            Ok(())
        } else {
            Err(DecodeError::AttachedIndexOutOfRange {
                index,
                len: self.cache.len(),
            })
        }
    }

    /// Returns the value at `index`, converting from the scripting side on
    /// first access and caching the converted value in place.
    pub fn resolve(&self, index: u32) -> DecodeResult<&HostValue> {
        let slot = self
            .cache
            .get(index as usize)
            .ok_or(DecodeError::AttachedIndexOutOfRange {
                index,
                len: self.cache.len(),
            })?;
        Ok(slot.get_or_init(|| self.source.convert(index as usize)))
    }

    /// Whether the value at `index` has already been converted.
    pub fn is_resolved(&self, index: u32) -> bool {
        self.cache
            .get(index as usize)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }
}

impl fmt::Debug for AttachedValueTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.cache.iter().filter(|c| c.get().is_some()).count();
        write!(
            f,
            "AttachedValueTable({} slot(s), {} resolved)",
            self.cache.len(),
            resolved
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
