//! Analysis session
//!
//! [`Analyzer`] owns all mutable analysis state: the counter store, the shadow
//! call stack and the per-array metadata. The host drives it through the
//! `on_*` callbacks, synchronously and in program order. Callbacks never fail
//! and always hand the observed value back untouched.

use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};

use crate::arrays::ArrayTracker;
use crate::config::AnalyzerConfig;
use crate::error::AnalysisResult;
use crate::report;
use crate::shape::signature_of;
use crate::stack::CallStack;
use crate::store::{Category, CounterStore};
use crate::value::{HostResolver, Identity, PropertyKey, ScalarKind, Site, Value};

/// Log and swallow a handler failure
fn contain(handler: &str, site: Site, result: AnalysisResult<()>) {
    if let Err(e) = result {
        log::warn!("{} at site {} failed: {}", handler, site, e);
    }
}

fn is_nullish(value: &Value<'_>) -> bool {
    match value {
        Value::Absent => true,
        Value::Scalar(scalar) => scalar.kind == ScalarKind::Null,
        _ => false,
    }
}

pub struct Analyzer {
    config: AnalyzerConfig,
    store: CounterStore,
    stack: CallStack,
    arrays: ArrayTracker,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            store: CounterStore::new(),
            stack: CallStack::new(),
            arrays: ArrayTracker::new(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Bound on findings printed per category
    pub fn set_warning_limit(&mut self, limit: usize) {
        self.config.warning_limit = limit;
    }

    pub fn warning_limit(&self) -> usize {
        self.config.warning_limit
    }

    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Replace the whole store, e.g. with one loaded from a snapshot
    pub fn set_store(&mut self, store: CounterStore) {
        self.store = store;
    }

    pub fn take_store(&mut self) -> CounterStore {
        std::mem::take(&mut self.store)
    }

    /// Fold a store saved by an earlier run into this one. This run's
    /// signatures are made portable first, so call it once the run is over:
    /// later observations would no longer match the merged entries.
    pub fn merge_saved(&mut self, saved: CounterStore, resolver: &dyn HostResolver) -> AnalysisResult<()> {
        let live = self.store.portable(resolver);
        let mut merged = saved;
        merged.merge(live)?;
        self.store = merged;
        Ok(())
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn arrays(&self) -> &ArrayTracker {
        &self.arrays
    }

    /// A property read `base[offset]` that produced `value`
    pub fn on_field_read<'v>(
        &mut self,
        site: Site,
        base: &Value<'_>,
        offset: &PropertyKey,
        value: Value<'v>,
    ) -> Value<'v> {
        contain("on_field_read", site, self.observe_read(site, base, offset));
        value
    }

    fn observe_read(&mut self, site: Site, base: &Value<'_>, offset: &PropertyKey) -> AnalysisResult<()> {
        if is_nullish(base) {
            return Ok(());
        }

        if let Value::Array(array) = base {
            if let Some(index) = offset.as_index() {
                if !array.has_own_index(index) {
                    log::trace!("Uninitialized element {} read at site {}", index, site);
                    self.store.record_count(Category::UninitArrayElem, site)?;
                }
            }
            return Ok(());
        }

        let signature = signature_of(base);
        log::trace!("Shape {:?} read at site {}", signature.layout(), site);
        self.store.record_shape(site, signature)
    }

    /// A property write `base[offset] = value`, before it is committed
    pub fn on_field_write_pre<'v>(
        &mut self,
        site: Site,
        base: &Value<'_>,
        offset: &PropertyKey,
        value: Value<'v>,
    ) -> Value<'v> {
        contain("on_field_write_pre", site, self.observe_write(site, base, offset, &value));
        value
    }

    fn observe_write(
        &mut self,
        site: Site,
        base: &Value<'_>,
        offset: &PropertyKey,
        value: &Value<'_>,
    ) -> AnalysisResult<()> {
        if let (Value::Array(array), Some(index)) = (base, offset.as_index()) {
            self.arrays.classify_on_first_write(*array);
            self.arrays.note_write(*array, value, site, &mut self.store)?;
            self.arrays.note_length_gap(*array, index, site, &mut self.store)?;
            return Ok(());
        }

        let slot_present = match base {
            Value::Object(object) => object.has_slot(offset),
            Value::Array(array) => array.has_slot(offset),
            Value::Scalar(_) if !is_nullish(base) => false,
            _ => return Ok(()),
        };

        if !slot_present && !value.is_absent() && self.outside_constructor(base) {
            log::trace!("Field created outside its constructor at site {}", site);
            self.store.record_count(Category::InitObjNonConstructor, site)?;
        }
        Ok(())
    }

    /// No frame, a non-constructor frame, or a base that the active
    /// constructor did not produce.
    fn outside_constructor(&self, base: &Value<'_>) -> bool {
        let Some(frame) = self.stack.current_frame() else {
            return true;
        };
        if !frame.is_constructor {
            return true;
        }
        let instance = match base {
            Value::Object(object) => object.is_instance_of(frame.function),
            Value::Array(array) => array.is_instance_of(frame.function),
            _ => false,
        };
        !instance
    }

    pub fn on_invoke_enter(&mut self, function: Identity, is_constructor: bool) {
        log::trace!("Enter {} (constructor: {})", function, is_constructor);
        self.stack.enter(function, is_constructor);
    }

    /// End of an invocation, normal or not. Constructor results have their
    /// shape recorded at `site`. Exactly one frame is popped.
    pub fn on_invoke_exit<'v>(
        &mut self,
        site: Site,
        function: Identity,
        return_value: Value<'v>,
        is_constructor: bool,
    ) -> Value<'v> {
        if is_constructor {
            let signature = signature_of(&return_value);
            contain("on_invoke_exit", site, self.store.record_shape(site, signature));
        }

        if let Some(frame) = self.stack.exit() {
            if frame.function != function {
                log::debug!(
                    "Exit of {} at site {} popped frame of {}",
                    function,
                    site,
                    frame.function
                );
            }
        }
        return_value
    }

    /// Enter an invocation and get a guard that pops the frame when dropped,
    /// so an unwinding host cannot leak stack entries.
    pub fn invoke(&mut self, function: Identity, is_constructor: bool) -> Invocation<'_> {
        self.on_invoke_enter(function, is_constructor);
        Invocation {
            analyzer: self,
            function,
            is_constructor,
            open: true,
        }
    }

    /// Print the ranked report to stdout
    pub fn on_run_end(&self, resolver: &dyn HostResolver) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.write_report(resolver, &mut out);
    }

    /// Render the report into `out`. Failures stop the report early and are
    /// logged; returns whether it completed.
    pub fn write_report(&self, resolver: &dyn HostResolver, out: &mut dyn Write) -> bool {
        let limit = self.config.warning_limit;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            report::write_report(&self.store, limit, resolver, out)
        }));

        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("Report generation stopped: {}", e);
                false
            }
            Err(_) => {
                log::error!("Report generation panicked");
                false
            }
        }
    }
}

/// An open invocation; dereferences to the analyzer
pub struct Invocation<'a> {
    analyzer: &'a mut Analyzer,
    function: Identity,
    is_constructor: bool,
    open: bool,
}

impl<'a> Invocation<'a> {
    /// Close the invocation normally with its result
    pub fn exit<'v>(mut self, site: Site, return_value: Value<'v>) -> Value<'v> {
        self.open = false;
        let (function, is_constructor) = (self.function, self.is_constructor);
        self.analyzer.on_invoke_exit(site, function, return_value, is_constructor)
    }
}

impl Deref for Invocation<'_> {
    type Target = Analyzer;

    fn deref(&self) -> &Analyzer {
        self.analyzer
    }
}

impl DerefMut for Invocation<'_> {
    fn deref_mut(&mut self) -> &mut Analyzer {
        self.analyzer
    }
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        if self.open {
            log::debug!("Invocation of {} abandoned; popping its frame", self.function);
            self.analyzer.stack.exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::heap::{Heap, HeapValue};
    use crate::value::Scalar;

    fn read(analyzer: &mut Analyzer, heap: &Heap, site: u32, base: &HeapValue, key: PropertyKey) {
        let view = heap.view(base).unwrap();
        analyzer.on_field_read(Site(site), &view.as_value(), &key, Value::Absent);
    }

    fn write(analyzer: &mut Analyzer, heap: &mut Heap, site: u32, base: &HeapValue, key: PropertyKey, value: HeapValue) {
        {
            let view = heap.view(base).unwrap();
            let written = heap.view(&value).unwrap();
            analyzer.on_field_write_pre(Site(site), &view.as_value(), &key, written.as_value());
        }
        heap.put(base, &key, value).unwrap();
    }

    #[test]
    fn test_monomorphic_reads() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let point = heap.define_function("Point");

        for _ in 0..4 {
            let p = HeapValue::Ref(heap.new_object(point).unwrap());
            heap.put(&p, &"x".into(), HeapValue::Number(1.0)).unwrap();
            read(&mut analyzer, &heap, 1, &p, "x".into());
        }

        let shapes = analyzer.store().site_shapes(Site(1)).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].count, 4);
    }

    #[test]
    fn test_layout_difference_is_polymorphic() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let a = HeapValue::Ref(heap.new_plain_object());
        let b = HeapValue::Ref(heap.new_plain_object());
        heap.put(&a, &"x".into(), HeapValue::Number(1.0)).unwrap();
        heap.put(&b, &"y".into(), HeapValue::Number(1.0)).unwrap();

        read(&mut analyzer, &heap, 2, &a, "x".into());
        read(&mut analyzer, &heap, 2, &b, "x".into());
        read(&mut analyzer, &heap, 2, &b, "x".into());

        let shapes = analyzer.store().site_shapes(Site(2)).unwrap();
        let summary: Vec<_> = shapes.iter().map(|s| (s.sig.layout().unwrap(), s.count)).collect();
        assert_eq!(summary, vec![("x|", 1), ("y|", 2)]);
    }

    #[test]
    fn test_absent_base_is_ignored() {
        let mut analyzer = Analyzer::default();
        let out = analyzer.on_field_read(
            Site(1),
            &Value::Absent,
            &"x".into(),
            Value::Scalar(Scalar::number(7.0)),
        );
        assert!(matches!(out, Value::Scalar(s) if s.kind == ScalarKind::Number(7.0)));
        assert!(analyzer.store().is_empty());
    }

    #[test]
    fn test_uninitialized_element_reads() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let arr = HeapValue::Ref(heap.new_array(vec![Some(HeapValue::Number(1.0)), Some(HeapValue::Number(2.0))]));

        read(&mut analyzer, &heap, 5, &arr, PropertyKey::Number(3.0));
        read(&mut analyzer, &heap, 6, &arr, PropertyKey::Number(1.0));
        read(&mut analyzer, &heap, 6, &arr, "length".into());

        assert_eq!(analyzer.store().site_count(Category::UninitArrayElem, Site(5)), Some(1));
        assert_eq!(analyzer.store().site_count(Category::UninitArrayElem, Site(6)), None);
        assert!(analyzer.store().site_shapes(Site(6)).is_none());
    }

    #[test]
    fn test_incontiguous_write() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let arr = HeapValue::Ref(heap.new_array(vec![Some(HeapValue::Number(1.0)), Some(HeapValue::Number(2.0))]));

        write(&mut analyzer, &mut heap, 3, &arr, PropertyKey::Number(0.0), HeapValue::Number(9.0));
        assert_eq!(analyzer.store().site_count(Category::IncontiguousArray, Site(3)), None);

        write(&mut analyzer, &mut heap, 4, &arr, PropertyKey::Number(5.0), HeapValue::Number(9.0));
        assert_eq!(analyzer.store().site_count(Category::IncontiguousArray, Site(4)), Some(1));
    }

    #[test]
    fn test_representation_flip_once() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let arr = HeapValue::Ref(heap.new_array(vec![Some(HeapValue::Number(1.0))]));

        write(&mut analyzer, &mut heap, 8, &arr, PropertyKey::Number(0.0), HeapValue::Str("a".into()));
        write(&mut analyzer, &mut heap, 8, &arr, PropertyKey::Number(0.0), HeapValue::Bool(true));
        write(&mut analyzer, &mut heap, 8, &arr, PropertyKey::Number(0.0), HeapValue::Number(2.0));
        write(&mut analyzer, &mut heap, 8, &arr, PropertyKey::Number(0.0), HeapValue::Null);

        assert_eq!(analyzer.store().site_count(Category::ArrayTypeSwitch, Site(8)), Some(1));
    }

    #[test]
    fn test_field_init_outside_constructor() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let obj = HeapValue::Ref(heap.new_plain_object());

        write(&mut analyzer, &mut heap, 7, &obj, "x".into(), HeapValue::Number(1.0));
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(7)), Some(1));

        // Overwriting an existing field is not an initialization
        write(&mut analyzer, &mut heap, 7, &obj, "x".into(), HeapValue::Number(2.0));
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(7)), Some(1));

        // Writing undefined does not create a field
        write(&mut analyzer, &mut heap, 9, &obj, "z".into(), HeapValue::Undefined);
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(9)), None);
    }

    #[test]
    fn test_field_init_inside_constructor() {
        let mut heap = Heap::new();
        let mut analyzer = Analyzer::default();
        let point = heap.define_function("Point");
        let helper = heap.define_function("helper");
        let obj = HeapValue::Ref(heap.new_object(point).unwrap());

        analyzer.on_invoke_enter(point, true);
        write(&mut analyzer, &mut heap, 7, &obj, "x".into(), HeapValue::Number(1.0));
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(7)), None);

        // Nested non-constructor call
        analyzer.on_invoke_enter(helper, false);
        write(&mut analyzer, &mut heap, 10, &obj, "y".into(), HeapValue::Number(1.0));
        analyzer.on_invoke_exit(Site(20), helper, Value::Absent, false);
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(10)), Some(1));

        // Constructor frame, but a foreign object
        let other = HeapValue::Ref(heap.new_plain_object());
        write(&mut analyzer, &mut heap, 11, &other, "x".into(), HeapValue::Number(1.0));
        assert_eq!(analyzer.store().site_count(Category::InitObjNonConstructor, Site(11)), Some(1));

        let view = heap.view(&obj).unwrap();
        analyzer.on_invoke_exit(Site(21), point, view.as_value(), true);
        assert_eq!(analyzer.call_stack().depth(), 0);
        assert_eq!(analyzer.store().site_shapes(Site(21)).unwrap()[0].sig.layout(), Some("x|y|"));
    }

    #[test]
    fn test_exit_pops_even_when_recording_fails() {
        let mut analyzer = Analyzer::default();
        // Make polystmt/3 a tally so shape recording there fails
        analyzer.store.increment_scalar(&["polystmt", "3"]).unwrap();

        analyzer.on_invoke_enter(Identity(1), true);
        analyzer.on_invoke_exit(Site(3), Identity(1), Value::Absent, true);
        assert_eq!(analyzer.call_stack().depth(), 0);
    }

    #[test]
    fn test_invocation_guard_pops_on_drop() {
        let mut analyzer = Analyzer::default();
        {
            let call = analyzer.invoke(Identity(4), false);
            assert_eq!(call.call_stack().depth(), 1);
        }
        assert_eq!(analyzer.call_stack().depth(), 0);

        let call = analyzer.invoke(Identity(4), true);
        call.exit(Site(1), Value::Scalar(Scalar::number(1.0)));
        assert_eq!(analyzer.call_stack().depth(), 0);
        assert_eq!(analyzer.store().site_shapes(Site(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_guard_survives_panicking_host() {
        let mut analyzer = Analyzer::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _call = analyzer.invoke(Identity(2), true);
            panic!("observed program threw");
        }));
        assert!(result.is_err());
        assert_eq!(analyzer.call_stack().depth(), 0);
    }

    /// Accepts `budget` bytes, then fails every write
    struct Truncating {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for Truncating {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let room = self.budget - self.written.len();
            if room == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "closed"));
            }
            let n = room.min(buf.len());
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_failure_keeps_earlier_output() {
        let mut analyzer = Analyzer::default();
        analyzer.store.record_shape(Site(4), crate::shape::Signature::Unrepresentable).unwrap();
        analyzer.store.record_shape(Site(4), signature_of(&Value::Scalar(Scalar::string()))).unwrap();
        analyzer.store.record_count(Category::UninitArrayElem, Site(8)).unwrap();

        let mut full = Vec::new();
        assert!(analyzer.write_report(&crate::value::NoResolver, &mut full));
        let full = String::from_utf8(full).unwrap();
        let second = full.find("Report of loading undeclared").unwrap();

        // Fail part-way through the second section
        let mut out = Truncating { written: Vec::new(), budget: second + 20 };
        assert!(!analyzer.write_report(&crate::value::NoResolver, &mut out));

        let partial = String::from_utf8(out.written).unwrap();
        assert_eq!(partial, full[..second + 20]);
        assert!(partial.contains("[Location: [site]: 4] <- No. layouts: 2"));
        assert!(partial.contains("Number of polymorphic statements spotted: 1"));
        assert!(!partial.contains("[Location: [site]: 8]"));

        let mut nothing = Truncating { written: Vec::new(), budget: 0 };
        assert!(!analyzer.write_report(&crate::value::NoResolver, &mut nothing));
    }

    #[test]
    fn test_set_warning_limit() {
        let mut analyzer = Analyzer::default();
        assert_eq!(analyzer.warning_limit(), 10);
        analyzer.set_warning_limit(0);
        for site in 0..3 {
            analyzer.store.record_count(Category::IncontiguousArray, Site(site)).unwrap();
        }
        let mut out = Vec::new();
        analyzer.write_report(&crate::value::NoResolver, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("No. usages"));
        assert!(text.contains("Number of putting incontiguous array statements: 3"));
    }
}
