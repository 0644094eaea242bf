//! Shape signatures
//!
//! A shape signature is the structural fingerprint of an object seen at a
//! site: the ordered list of its own non-index property names plus the
//! identities of its prototype and constructor. Two objects with equal
//! signatures would share a hidden class in an optimizing engine.

use serde::{Deserialize, Serialize};

use crate::error::AnalysisResult;
use crate::value::{HostObject, HostResolver, Identity, ScalarKind, Unrepresentable, Value};

/// Separator appended after every property name in a layout
pub const LAYOUT_DELIMITER: char = '|';

const UNREPRESENTABLE_TEXT: &str = "exception when generating signature";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeSignature {
    pub layout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<Identity>,
    /// Name of the constructor, filled in when the signature is made portable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_name: Option<String>,
    /// Name of the constructor owning the prototype, likewise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype_owner: Option<String>,
}

impl ShapeSignature {
    /// Copy that keeps its meaning in another process. Identity tokens are
    /// only valid in the run that issued them, so they are replaced by the
    /// names `resolver` gives them. Names already present are kept.
    pub fn portable(&self, resolver: &dyn HostResolver) -> ShapeSignature {
        ShapeSignature {
            layout: self.layout.clone(),
            prototype: None,
            constructor: None,
            constructor_name: resolve_name(self.constructor, &self.constructor_name, |id| {
                resolver.function_name(id)
            }),
            prototype_owner: resolve_name(self.prototype, &self.prototype_owner, |id| {
                resolver.prototype_owner_name(id)
            }),
        }
    }

    fn constructor_display(&self, resolver: &dyn HostResolver) -> AnalysisResult<Option<String>> {
        match self.constructor {
            Some(id) => resolver.function_name(id),
            None => Ok(self.constructor_name.clone()),
        }
    }

    fn prototype_display(&self, resolver: &dyn HostResolver) -> AnalysisResult<Option<String>> {
        match self.prototype {
            Some(id) => resolver.prototype_owner_name(id),
            None => Ok(self.prototype_owner.clone()),
        }
    }
}

// An identity the resolver cannot name is dropped; such shapes then only
// differ by layout once saved.
fn resolve_name(
    id: Option<Identity>,
    known: &Option<String>,
    lookup: impl Fn(Identity) -> AnalysisResult<Option<String>>,
) -> Option<String> {
    let Some(id) = id else {
        return known.clone();
    };
    lookup(id).unwrap_or_else(|e| {
        log::debug!("Could not name {}: {}", id, e);
        None
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    Shape(ShapeSignature),
    /// Reflection failed. Every failure is the same sentinel, distinct from
    /// all shapes.
    Unrepresentable,
}

impl Signature {
    /// Shape equality: layout by string, prototype and constructor by token
    pub fn same_shape(&self, other: &Signature) -> bool {
        self == other
    }

    pub fn layout(&self) -> Option<&str> {
        match self {
            Signature::Shape(shape) => Some(&shape.layout),
            Signature::Unrepresentable => None,
        }
    }

    pub fn is_unrepresentable(&self) -> bool {
        matches!(self, Signature::Unrepresentable)
    }

    pub fn portable(&self, resolver: &dyn HostResolver) -> Signature {
        match self {
            Signature::Shape(shape) => Signature::Shape(shape.portable(resolver)),
            Signature::Unrepresentable => Signature::Unrepresentable,
        }
    }
}

/// Free-function form of [`Signature::same_shape`]
pub fn equal_signatures(a: &Signature, b: &Signature) -> bool {
    a.same_shape(b)
}

/// Whether a property name looks like an array index.
///
/// Mirrors integer-prefix parsing: optional leading whitespace, an optional
/// sign, then at least one ASCII digit.
pub fn is_index_like(name: &str) -> bool {
    let trimmed = name.trim_start();
    let unsigned = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);
    unsigned.starts_with(|c: char| c.is_ascii_digit())
}

fn object_shape(object: &dyn HostObject) -> Result<ShapeSignature, Unrepresentable> {
    let mut layout = String::new();
    for name in object.own_keys()? {
        if !is_index_like(&name) {
            layout.push_str(&name);
            layout.push(LAYOUT_DELIMITER);
        }
    }

    Ok(ShapeSignature {
        layout,
        prototype: object.prototype()?,
        constructor: object.constructor()?,
        ..ShapeSignature::default()
    })
}

fn shape_of(value: &Value<'_>) -> Result<ShapeSignature, Unrepresentable> {
    match value {
        Value::Absent => Err(Unrepresentable),
        Value::Scalar(scalar) => match scalar.kind {
            ScalarKind::Null => Err(Unrepresentable),
            _ => Ok(ShapeSignature {
                prototype: scalar.prototype,
                constructor: scalar.constructor,
                ..ShapeSignature::default()
            }),
        },
        Value::Object(object) => object_shape(*object),
        Value::Array(array) => object_shape(array.as_object()),
    }
}

/// Derive the signature of an observed value. Never fails: values that
/// refuse reflection yield [`Signature::Unrepresentable`].
pub fn signature_of(value: &Value<'_>) -> Signature {
    match shape_of(value) {
        Ok(shape) => Signature::Shape(shape),
        Err(Unrepresentable) => Signature::Unrepresentable,
    }
}

fn try_display(shape: &ShapeSignature, resolver: &dyn HostResolver) -> AnalysisResult<String> {
    let bare = ShapeSignature {
        constructor_name: None,
        prototype_owner: None,
        ..shape.clone()
    };
    let mut text = serde_json::to_string(&bare)?;

    if let Some(name) = shape.constructor_display(resolver)? {
        text.push_str(" | constructor: ");
        text.push_str(&name);
    }
    if let Some(name) = shape.prototype_display(resolver)? {
        text.push_str(" | proto constructor: ");
        text.push_str(&name);
    }

    Ok(text)
}

/// Human-readable rendering of a signature; degrades instead of failing.
pub fn signature_to_display_string(signature: &Signature, resolver: &dyn HostResolver) -> String {
    match signature {
        Signature::Unrepresentable => UNREPRESENTABLE_TEXT.to_string(),
        Signature::Shape(shape) => try_display(shape, resolver).unwrap_or_else(|e| {
            log::debug!("Degraded signature display: {}", e);
            format!(
                "{} | constructor or prototype cannot be stringified",
                shape.layout
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::value::{PropertyKey, Scalar};

    struct Fake {
        keys: Vec<&'static str>,
        opaque: bool,
    }

    impl HostObject for Fake {
        fn own_keys(&self) -> Result<Vec<String>, Unrepresentable> {
            if self.opaque {
                return Err(Unrepresentable);
            }
            Ok(self.keys.iter().map(|k| k.to_string()).collect())
        }

        fn prototype(&self) -> Result<Option<Identity>, Unrepresentable> {
            Ok(Some(Identity(1)))
        }

        fn constructor(&self) -> Result<Option<Identity>, Unrepresentable> {
            Ok(Some(Identity(2)))
        }

        fn has_slot(&self, _key: &PropertyKey) -> bool {
            false
        }

        fn is_instance_of(&self, _function: Identity) -> bool {
            false
        }
    }

    struct Names;

    impl HostResolver for Names {
        fn function_name(&self, _function: Identity) -> AnalysisResult<Option<String>> {
            Ok(Some("Point".to_string()))
        }

        fn prototype_owner_name(&self, _prototype: Identity) -> AnalysisResult<Option<String>> {
            Err(AnalysisError::Resolve { what: "prototype".to_string() })
        }
    }

    #[test]
    fn test_layout_skips_index_names() {
        let obj = Fake { keys: vec!["x", "0", "y", "12abc", " -3", "Infinity"], opaque: false };
        let sig = signature_of(&Value::Object(&obj));
        assert_eq!(sig.layout(), Some("x|y|Infinity|"));
    }

    #[test]
    fn test_index_like_names() {
        assert!(is_index_like("0"));
        assert!(is_index_like("+7"));
        assert!(is_index_like("  42"));
        assert!(!is_index_like("x1"));
        assert!(!is_index_like(""));
        assert!(!is_index_like("-"));
    }

    #[test]
    fn test_opaque_object_is_unrepresentable() {
        let obj = Fake { keys: vec![], opaque: true };
        let plain = Fake { keys: vec![], opaque: false };
        let a = signature_of(&Value::Object(&obj));
        let b = signature_of(&Value::Object(&obj));
        assert!(a.is_unrepresentable());
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&signature_of(&Value::Object(&plain))));
    }

    struct Classes;

    impl HostResolver for Classes {
        fn function_name(&self, function: Identity) -> AnalysisResult<Option<String>> {
            Ok((function == Identity(2)).then(|| "Point".to_string()))
        }

        fn prototype_owner_name(&self, prototype: Identity) -> AnalysisResult<Option<String>> {
            Ok((prototype == Identity(1)).then(|| "Point".to_string()))
        }
    }

    #[test]
    fn test_portable_replaces_identities_with_names() {
        let obj = Fake { keys: vec!["x"], opaque: false };
        let Signature::Shape(live) = signature_of(&Value::Object(&obj)) else {
            panic!("expected a shape");
        };
        let saved = live.portable(&Classes);
        assert_eq!(saved.prototype, None);
        assert_eq!(saved.constructor, None);
        assert_eq!(saved.constructor_name.as_deref(), Some("Point"));
        assert_eq!(saved.prototype_owner.as_deref(), Some("Point"));

        // Already portable: names survive a resolver that knows nothing
        assert_eq!(saved.portable(&crate::value::NoResolver), saved);
        assert_eq!(
            signature_to_display_string(&Signature::Shape(saved), &crate::value::NoResolver),
            r#"{"layout":"x|"} | constructor: Point | proto constructor: Point"#
        );
    }

    #[test]
    fn test_scalars() {
        let num = Scalar::number(1.0).with_reflection(Identity(5), Identity(6));
        match signature_of(&Value::Scalar(num)) {
            Signature::Shape(shape) => {
                assert_eq!(shape.layout, "");
                assert_eq!(shape.prototype, Some(Identity(5)));
                assert_eq!(shape.constructor, Some(Identity(6)));
            }
            Signature::Unrepresentable => panic!("number should be representable"),
        }
        assert!(signature_of(&Value::Scalar(Scalar::null())).is_unrepresentable());
        assert!(signature_of(&Value::Absent).is_unrepresentable());
    }

    #[test]
    fn test_equal_signatures() {
        let a = Fake { keys: vec!["x", "y"], opaque: false };
        let b = Fake { keys: vec!["x", "y"], opaque: false };
        let c = Fake { keys: vec!["y", "x"], opaque: false };
        let sa = signature_of(&Value::Object(&a));
        assert!(equal_signatures(&sa, &signature_of(&Value::Object(&b))));
        assert!(!equal_signatures(&sa, &signature_of(&Value::Object(&c))));
    }

    #[test]
    fn test_display_degrades_on_resolver_error() {
        let obj = Fake { keys: vec!["x"], opaque: false };
        let sig = signature_of(&Value::Object(&obj));
        let text = signature_to_display_string(&sig, &Names);
        assert_eq!(text, "x| | constructor or prototype cannot be stringified");
    }

    #[test]
    fn test_display_with_names() {
        let obj = Fake { keys: vec!["x"], opaque: false };
        let sig = signature_to_display_string(
            &signature_of(&Value::Object(&obj)),
            &crate::value::NoResolver,
        );
        assert_eq!(sig, r#"{"layout":"x|","prototype":1,"constructor":2}"#);
        assert_eq!(
            signature_to_display_string(&Signature::Unrepresentable, &Names),
            UNREPRESENTABLE_TEXT
        );
    }
}
