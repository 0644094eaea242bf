//! Host boundary
//!
//! Everything the instrumentation host hands to the analyzer is expressed with
//! the types in this module. Values are classified once, at the boundary, into
//! [`Value`]; prototypes, constructors, functions and arrays are referred to by
//! opaque [`Identity`] tokens issued by the host's reflection layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisResult;

/// Opaque identity token issued by the host (prototype, function, array...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub u64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One static instrumentation point in the observed program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Site(pub u32);

impl Site {
    /// Key used for this site inside the counter store
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Property name or element offset used by a field access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Number(f64),
    Name(String),
}

impl PropertyKey {
    /// Numeric offset that is not NaN, i.e. an element access
    pub fn as_index(&self) -> Option<f64> {
        match self {
            PropertyKey::Number(n) if !n.is_nan() => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<f64> for PropertyKey {
    fn from(n: f64) -> Self {
        PropertyKey::Number(n)
    }
}

/// Marker returned when a value forbids reflection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unrepresentable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarKind {
    Number(f64),
    String,
    Boolean,
    Null,
}

/// A primitive value together with whatever prototype/constructor the host
/// can derive for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub prototype: Option<Identity>,
    pub constructor: Option<Identity>,
}

impl Scalar {
    pub fn number(n: f64) -> Self {
        Self { kind: ScalarKind::Number(n), prototype: None, constructor: None }
    }

    pub fn string() -> Self {
        Self { kind: ScalarKind::String, prototype: None, constructor: None }
    }

    pub fn boolean() -> Self {
        Self { kind: ScalarKind::Boolean, prototype: None, constructor: None }
    }

    pub fn null() -> Self {
        Self { kind: ScalarKind::Null, prototype: None, constructor: None }
    }

    pub fn with_reflection(mut self, prototype: Identity, constructor: Identity) -> Self {
        self.prototype = Some(prototype);
        self.constructor = Some(constructor);
        self
    }
}

/// Reflection surface of a heap object
pub trait HostObject {
    /// Own enumerable property names in enumeration order
    fn own_keys(&self) -> Result<Vec<String>, Unrepresentable>;

    fn prototype(&self) -> Result<Option<Identity>, Unrepresentable>;

    fn constructor(&self) -> Result<Option<Identity>, Unrepresentable>;

    /// Whether reading `key` (own or inherited) yields a defined value
    fn has_slot(&self, key: &PropertyKey) -> bool;

    fn is_instance_of(&self, function: Identity) -> bool;
}

/// Element classification used by the array representation tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Absent,
    Number,
    Other,
}

/// Reflection surface of an indexed collection
pub trait HostArray: HostObject {
    fn as_object(&self) -> &dyn HostObject;

    fn identity(&self) -> Identity;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element(&self, index: usize) -> ElementKind;

    /// Whether `offset` names an own element slot
    fn has_own_index(&self, offset: f64) -> bool;
}

/// An observed value, classified once at the host boundary
#[derive(Clone, Copy)]
pub enum Value<'a> {
    Absent,
    Scalar(Scalar),
    Object(&'a dyn HostObject),
    Array(&'a dyn HostArray),
}

impl<'a> Value<'a> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Numbers (NaN included) and absent values keep an array numeric
    pub fn keeps_numeric(&self) -> bool {
        matches!(
            self,
            Value::Absent | Value::Scalar(Scalar { kind: ScalarKind::Number(_), .. })
        )
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "Absent"),
            Value::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            Value::Object(_) => write!(f, "Object(..)"),
            Value::Array(a) => write!(f, "Array({}, len={})", a.identity(), a.len()),
        }
    }
}

/// Name lookups the report needs from the host.
///
/// Every method has a default so a host can implement only what it knows.
pub trait HostResolver {
    fn location_of(&self, _site: Site) -> Option<String> {
        None
    }

    fn function_name(&self, _function: Identity) -> AnalysisResult<Option<String>> {
        Ok(None)
    }

    /// Name of the constructor whose prototype object is `prototype`
    fn prototype_owner_name(&self, _prototype: Identity) -> AnalysisResult<Option<String>> {
        Ok(None)
    }
}

/// Resolver that knows nothing; sites print as raw ids
pub struct NoResolver;

impl HostResolver for NoResolver {}

/// Location string for `site`, falling back to the raw id
pub fn display_location(resolver: &dyn HostResolver, site: Site) -> String {
    resolver
        .location_of(site)
        .unwrap_or_else(|| format!("[site]: {}", site))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_index() {
        assert_eq!(PropertyKey::Number(3.0).as_index(), Some(3.0));
        assert_eq!(PropertyKey::Number(-1.5).as_index(), Some(-1.5));
        assert_eq!(PropertyKey::Number(f64::NAN).as_index(), None);
        assert_eq!(PropertyKey::from("3").as_index(), None);
    }

    #[test]
    fn test_keeps_numeric() {
        assert!(Value::Absent.keeps_numeric());
        assert!(Value::Scalar(Scalar::number(f64::NAN)).keeps_numeric());
        assert!(!Value::Scalar(Scalar::string()).keeps_numeric());
        assert!(!Value::Scalar(Scalar::null()).keeps_numeric());
    }

    #[test]
    fn test_default_location() {
        assert_eq!(display_location(&NoResolver, Site(42)), "[site]: 42");
    }
}
