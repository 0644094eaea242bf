//! Array representation tracker
//!
//! Engines keep arrays of plain numbers in an unboxed, contiguous backing
//! store. A write of a non-number, or a write far past the end, forces a
//! slower representation. Metadata is attached lazily to each array on its
//! first monitored write and only ever moves from numeric to non-numeric.

use rustc_hash::FxHashMap;

use crate::error::AnalysisResult;
use crate::store::{Category, CounterStore};
use crate::value::{ElementKind, HostArray, Identity, Site, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationKind {
    Numeric,
    NonNumeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayMeta {
    pub kind: RepresentationKind,
}

impl ArrayMeta {
    /// Scan current elements; any present non-number makes it non-numeric
    fn scan(array: &dyn HostArray) -> Self {
        let mixed = (0..array.len()).any(|i| array.element(i) == ElementKind::Other);
        let kind = if mixed {
            RepresentationKind::NonNumeric
        } else {
            RepresentationKind::Numeric
        };
        Self { kind }
    }
}

#[derive(Debug, Default)]
pub struct ArrayTracker {
    meta: FxHashMap<Identity, ArrayMeta>,
}

impl ArrayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `array`, computed on first call and cached afterwards
    pub fn classify_on_first_write(&mut self, array: &dyn HostArray) -> ArrayMeta {
        *self.meta.entry(array.identity()).or_insert_with(|| {
            let meta = ArrayMeta::scan(array);
            log::debug!("Array {} classified as {:?}", array.identity(), meta.kind);
            meta
        })
    }

    pub fn meta(&self, array: Identity) -> Option<ArrayMeta> {
        self.meta.get(&array).copied()
    }

    /// Flip a numeric array to non-numeric when `written` is not a number.
    /// Returns whether a flip happened.
    pub fn note_write(
        &mut self,
        array: &dyn HostArray,
        written: &Value<'_>,
        site: Site,
        store: &mut CounterStore,
    ) -> AnalysisResult<bool> {
        self.classify_on_first_write(array);
        let meta = match self.meta.get_mut(&array.identity()) {
            Some(meta) => meta,
            None => return Ok(false),
        };

        if meta.kind == RepresentationKind::Numeric && !written.keeps_numeric() {
            meta.kind = RepresentationKind::NonNumeric;
            log::debug!("Array {} switched representation at site {}", array.identity(), site);
            store.record_count(Category::ArrayTypeSwitch, site)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a write whose offset lies beyond the current length
    pub fn note_length_gap(
        &self,
        array: &dyn HostArray,
        offset: f64,
        site: Site,
        store: &mut CounterStore,
    ) -> AnalysisResult<bool> {
        if offset > array.len() as f64 {
            store.record_count(Category::IncontiguousArray, site)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{HostObject, PropertyKey, Scalar, Unrepresentable};

    struct Elements {
        id: u64,
        items: Vec<ElementKind>,
    }

    impl HostObject for Elements {
        fn own_keys(&self) -> Result<Vec<String>, Unrepresentable> {
            Ok((0..self.items.len()).map(|i| i.to_string()).collect())
        }

        fn prototype(&self) -> Result<Option<Identity>, Unrepresentable> {
            Ok(None)
        }

        fn constructor(&self) -> Result<Option<Identity>, Unrepresentable> {
            Ok(None)
        }

        fn has_slot(&self, _key: &PropertyKey) -> bool {
            false
        }

        fn is_instance_of(&self, _function: Identity) -> bool {
            false
        }
    }

    impl HostArray for Elements {
        fn as_object(&self) -> &dyn HostObject {
            self
        }

        fn identity(&self) -> Identity {
            Identity(self.id)
        }

        fn len(&self) -> usize {
            self.items.len()
        }

        fn element(&self, index: usize) -> ElementKind {
            self.items[index]
        }

        fn has_own_index(&self, offset: f64) -> bool {
            offset >= 0.0 && (offset as usize) < self.items.len()
        }
    }

    #[test]
    fn test_classification() {
        let mut tracker = ArrayTracker::new();
        let numeric = Elements { id: 1, items: vec![ElementKind::Number, ElementKind::Absent] };
        let mixed = Elements { id: 2, items: vec![ElementKind::Number, ElementKind::Other] };
        let empty = Elements { id: 3, items: vec![] };

        assert_eq!(tracker.classify_on_first_write(&numeric).kind, RepresentationKind::Numeric);
        assert_eq!(tracker.classify_on_first_write(&mixed).kind, RepresentationKind::NonNumeric);
        assert_eq!(tracker.classify_on_first_write(&empty).kind, RepresentationKind::Numeric);
    }

    #[test]
    fn test_classification_is_cached() {
        let mut tracker = ArrayTracker::new();
        let mut array = Elements { id: 1, items: vec![ElementKind::Number] };
        tracker.classify_on_first_write(&array);
        array.items.push(ElementKind::Other);
        assert_eq!(tracker.classify_on_first_write(&array).kind, RepresentationKind::Numeric);
    }

    #[test]
    fn test_flip_counted_once() {
        let mut tracker = ArrayTracker::new();
        let mut store = CounterStore::new();
        let array = Elements { id: 9, items: vec![ElementKind::Number; 3] };
        let text = Value::Scalar(Scalar::string());

        assert!(!tracker.note_write(&array, &Value::Scalar(Scalar::number(4.0)), Site(1), &mut store).unwrap());
        assert!(tracker.note_write(&array, &text, Site(1), &mut store).unwrap());
        assert!(!tracker.note_write(&array, &text, Site(1), &mut store).unwrap());
        assert!(!tracker.note_write(&array, &Value::Scalar(Scalar::number(1.0)), Site(1), &mut store).unwrap());
        assert!(!tracker.note_write(&array, &text, Site(1), &mut store).unwrap());

        assert_eq!(store.site_count(Category::ArrayTypeSwitch, Site(1)), Some(1));
        assert_eq!(tracker.meta(Identity(9)).map(|m| m.kind), Some(RepresentationKind::NonNumeric));
    }

    #[test]
    fn test_length_gap() {
        let tracker = ArrayTracker::new();
        let mut store = CounterStore::new();
        let array = Elements { id: 1, items: vec![ElementKind::Number; 2] };

        assert!(!tracker.note_length_gap(&array, 0.0, Site(3), &mut store).unwrap());
        assert!(!tracker.note_length_gap(&array, 2.0, Site(3), &mut store).unwrap());
        assert!(tracker.note_length_gap(&array, 5.0, Site(3), &mut store).unwrap());
        assert_eq!(store.site_count(Category::IncontiguousArray, Site(3)), Some(1));
    }
}
