//! In-memory reference host
//!
//! A small prototype-based object heap that implements the analyzer's
//! reflection traits. Used by the trace replayer and by tests; real hosts
//! implement [`HostObject`] / [`HostArray`] over their own object model.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::value::{
    ElementKind, HostArray, HostObject, HostResolver, Identity, PropertyKey, Scalar, Unrepresentable,
    Value,
};

/// A value stored in the heap
#[derive(Debug, Clone, PartialEq)]
pub enum HeapValue {
    Undefined,
    Null,
    Number(f64),
    Str(String),
    Bool(bool),
    Ref(Identity),
}

impl HeapValue {
    fn is_defined(&self) -> bool {
        !matches!(self, HeapValue::Undefined)
    }

    fn element_kind(slot: Option<&HeapValue>) -> ElementKind {
        match slot {
            None | Some(HeapValue::Undefined) => ElementKind::Absent,
            Some(HeapValue::Number(_)) => ElementKind::Number,
            Some(_) => ElementKind::Other,
        }
    }
}

#[derive(Debug, Default)]
struct ObjectCell {
    props: Vec<(String, HeapValue)>,
    prototype: Option<Identity>,
    constructor: Option<Identity>,
    opaque: bool,
}

impl ObjectCell {
    fn own(&self, name: &str) -> Option<&HeapValue> {
        self.props.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn put(&mut self, name: String, value: HeapValue) {
        match self.props.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.props.push((name, value)),
        }
    }
}

/// Sparse element storage: holes are simply missing keys
#[derive(Debug, Default)]
struct Elements {
    slots: BTreeMap<usize, HeapValue>,
    length: usize,
}

impl Elements {
    fn from_dense(values: Vec<Option<HeapValue>>) -> Self {
        let length = values.len();
        let slots = values
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|v| (i, v)))
            .collect();
        Self { slots, length }
    }

    fn set(&mut self, index: usize, value: HeapValue) {
        self.length = self.length.max(index + 1);
        self.slots.insert(index, value);
    }
}

#[derive(Debug)]
enum Cell {
    Object(ObjectCell),
    Array {
        object: ObjectCell,
        elements: Elements,
    },
    Function {
        object: ObjectCell,
        name: String,
        prototype: Identity,
    },
}

impl Cell {
    fn object(&self) -> &ObjectCell {
        match self {
            Cell::Object(object) | Cell::Array { object, .. } | Cell::Function { object, .. } => object,
        }
    }

    fn object_mut(&mut self) -> &mut ObjectCell {
        match self {
            Cell::Object(object) | Cell::Array { object, .. } | Cell::Function { object, .. } => object,
        }
    }
}

/// Largest element index; larger offsets name ordinary properties
const MAX_ARRAY_INDEX: f64 = (u32::MAX - 1) as f64;

fn key_name(key: &PropertyKey) -> String {
    match key {
        PropertyKey::Name(name) => name.clone(),
        PropertyKey::Number(n) if *n == 0.0 => "0".to_string(),
        PropertyKey::Number(n) => format!("{}", n),
    }
}

fn array_index(key: &PropertyKey) -> Option<usize> {
    match key {
        PropertyKey::Number(n) if (0.0..=MAX_ARRAY_INDEX).contains(n) && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Built-in constructors every heap starts with
#[derive(Debug, Clone, Copy)]
struct Builtins {
    object: Identity,
    array: Identity,
    number: Identity,
    string: Identity,
    boolean: Identity,
}

pub struct Heap {
    cells: FxHashMap<Identity, Cell>,
    prototype_owners: FxHashMap<Identity, Identity>,
    next_id: u64,
    builtins: Builtins,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        let placeholder = Identity(0);
        let mut heap = Self {
            cells: FxHashMap::default(),
            prototype_owners: FxHashMap::default(),
            next_id: 1,
            builtins: Builtins {
                object: placeholder,
                array: placeholder,
                number: placeholder,
                string: placeholder,
                boolean: placeholder,
            },
        };

        heap.builtins.object = heap.define_with_parent("Object", None);
        heap.builtins.array = heap.define_function("Array");
        heap.builtins.number = heap.define_function("Number");
        heap.builtins.string = heap.define_function("String");
        heap.builtins.boolean = heap.define_function("Boolean");
        heap
    }

    fn allocate(&mut self, cell: Cell) -> Identity {
        let id = Identity(self.next_id);
        self.next_id += 1;
        self.cells.insert(id, cell);
        id
    }

    fn cell(&self, id: Identity) -> AnalysisResult<&Cell> {
        self.cells.get(&id).ok_or(AnalysisError::UnknownReference { id: id.0 })
    }

    fn cell_mut(&mut self, id: Identity) -> AnalysisResult<&mut Cell> {
        self.cells.get_mut(&id).ok_or(AnalysisError::UnknownReference { id: id.0 })
    }

    fn define_with_parent(&mut self, name: &str, parent: Option<Identity>) -> Identity {
        let prototype = self.allocate(Cell::Object(ObjectCell {
            prototype: parent,
            ..ObjectCell::default()
        }));
        let function = self.allocate(Cell::Function {
            object: ObjectCell::default(),
            name: name.to_string(),
            prototype,
        });
        if let Some(Cell::Object(proto)) = self.cells.get_mut(&prototype) {
            proto.constructor = Some(function);
        }
        self.prototype_owners.insert(prototype, function);
        function
    }

    /// Define a constructor function whose prototype inherits from Object's
    pub fn define_function(&mut self, name: &str) -> Identity {
        let parent = self.prototype_of_function(self.builtins.object).ok();
        self.define_with_parent(name, parent)
    }

    fn prototype_of_function(&self, function: Identity) -> AnalysisResult<Identity> {
        match self.cell(function)? {
            Cell::Function { prototype, .. } => Ok(*prototype),
            _ => Err(AnalysisError::Replay {
                message: format!("{} is not a function", function),
            }),
        }
    }

    /// Allocate an object as `new constructor()` would, before any fields
    pub fn new_object(&mut self, constructor: Identity) -> AnalysisResult<Identity> {
        let prototype = self.prototype_of_function(constructor)?;
        Ok(self.allocate(Cell::Object(ObjectCell {
            prototype: Some(prototype),
            constructor: Some(constructor),
            ..ObjectCell::default()
        })))
    }

    /// Object literal
    pub fn new_plain_object(&mut self) -> Identity {
        let object = self.builtins.object;
        match self.new_object(object) {
            Ok(id) => id,
            Err(_) => self.allocate(Cell::Object(ObjectCell::default())),
        }
    }

    /// Array literal; `None` entries are holes
    pub fn new_array(&mut self, elements: Vec<Option<HeapValue>>) -> Identity {
        let constructor = self.builtins.array;
        let prototype = self.prototype_of_function(constructor).ok();
        self.allocate(Cell::Array {
            object: ObjectCell {
                prototype,
                constructor: Some(constructor),
                ..ObjectCell::default()
            },
            elements: Elements::from_dense(elements),
        })
    }

    /// Make an object refuse reflection
    pub fn set_opaque(&mut self, id: Identity) -> AnalysisResult<()> {
        self.cell_mut(id)?.object_mut().opaque = true;
        Ok(())
    }

    fn function_name_of(&self, function: Identity) -> Option<&str> {
        match self.cells.get(&function)? {
            Cell::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Read `key` from `base`, following the prototype chain
    pub fn get(&self, base: &HeapValue, key: &PropertyKey) -> AnalysisResult<HeapValue> {
        let HeapValue::Ref(id) = base else {
            return Ok(HeapValue::Undefined);
        };
        if let Cell::Array { elements, .. } = self.cell(*id)? {
            if let Some(index) = array_index(key) {
                return Ok(elements.slots.get(&index).cloned().unwrap_or(HeapValue::Undefined));
            }
            if key_name(key) == "length" {
                return Ok(HeapValue::Number(elements.length as f64));
            }
        }
        Ok(self.lookup(*id, &key_name(key)).cloned().unwrap_or(HeapValue::Undefined))
    }

    fn lookup(&self, id: Identity, name: &str) -> Option<&HeapValue> {
        let mut current = Some(id);
        while let Some(id) = current {
            let object = self.cells.get(&id)?.object();
            if let Some(value) = object.own(name) {
                return Some(value);
            }
            current = object.prototype;
        }
        None
    }

    /// Write `value` to `key` on `base`. Writes to primitives are dropped.
    pub fn put(&mut self, base: &HeapValue, key: &PropertyKey, value: HeapValue) -> AnalysisResult<()> {
        let HeapValue::Ref(id) = base else {
            return Ok(());
        };
        match (self.cell_mut(*id)?, array_index(key)) {
            (Cell::Array { elements, .. }, Some(index)) => elements.set(index, value),
            (cell, _) => cell.object_mut().put(key_name(key), value),
        }
        Ok(())
    }

    fn scalar(&self, value: Scalar, constructor: Identity) -> Scalar {
        match self.prototype_of_function(constructor) {
            Ok(prototype) => value.with_reflection(prototype, constructor),
            Err(_) => value,
        }
    }

    /// Classify a heap value for the analyzer
    pub fn view(&self, value: &HeapValue) -> AnalysisResult<View<'_>> {
        Ok(match value {
            HeapValue::Undefined => View::Absent,
            HeapValue::Null => View::Scalar(Scalar::null()),
            HeapValue::Number(n) => View::Scalar(self.scalar(Scalar::number(*n), self.builtins.number)),
            HeapValue::Str(_) => View::Scalar(self.scalar(Scalar::string(), self.builtins.string)),
            HeapValue::Bool(_) => View::Scalar(self.scalar(Scalar::boolean(), self.builtins.boolean)),
            HeapValue::Ref(id) => match self.cell(*id)? {
                Cell::Array { object, elements } => View::Array(ArrayView {
                    heap: self,
                    id: *id,
                    object,
                    elements,
                }),
                cell => View::Object(ObjectView {
                    heap: self,
                    object: cell.object(),
                }),
            },
        })
    }

    fn is_instance(&self, prototype: Option<Identity>, function: Identity) -> bool {
        let Ok(target) = self.prototype_of_function(function) else {
            return false;
        };
        let mut current = prototype;
        while let Some(id) = current {
            if id == target {
                return true;
            }
            current = self.cells.get(&id).and_then(|c| c.object().prototype);
        }
        false
    }

    fn has_named_slot(&self, object: &ObjectCell, name: &str) -> bool {
        if let Some(value) = object.own(name) {
            return value.is_defined();
        }
        object
            .prototype
            .and_then(|p| self.lookup(p, name))
            .map_or(false, HeapValue::is_defined)
    }
}

/// Borrowed classification of a heap value; lend it out with [`View::as_value`]
pub enum View<'h> {
    Absent,
    Scalar(Scalar),
    Object(ObjectView<'h>),
    Array(ArrayView<'h>),
}

impl<'h> View<'h> {
    pub fn as_value(&self) -> Value<'_> {
        match self {
            View::Absent => Value::Absent,
            View::Scalar(scalar) => Value::Scalar(*scalar),
            View::Object(object) => Value::Object(object),
            View::Array(array) => Value::Array(array),
        }
    }
}

pub struct ObjectView<'h> {
    heap: &'h Heap,
    object: &'h ObjectCell,
}

fn own_keys_of(object: &ObjectCell) -> Result<Vec<String>, Unrepresentable> {
    if object.opaque {
        return Err(Unrepresentable);
    }
    Ok(object.props.iter().map(|(k, _)| k.clone()).collect())
}

fn reflect<T>(object: &ObjectCell, value: T) -> Result<T, Unrepresentable> {
    if object.opaque {
        Err(Unrepresentable)
    } else {
        Ok(value)
    }
}

impl HostObject for ObjectView<'_> {
    fn own_keys(&self) -> Result<Vec<String>, Unrepresentable> {
        own_keys_of(self.object)
    }

    fn prototype(&self) -> Result<Option<Identity>, Unrepresentable> {
        reflect(self.object, self.object.prototype)
    }

    fn constructor(&self) -> Result<Option<Identity>, Unrepresentable> {
        reflect(self.object, self.object.constructor)
    }

    fn has_slot(&self, key: &PropertyKey) -> bool {
        self.heap.has_named_slot(self.object, &key_name(key))
    }

    fn is_instance_of(&self, function: Identity) -> bool {
        self.heap.is_instance(self.object.prototype, function)
    }
}

pub struct ArrayView<'h> {
    heap: &'h Heap,
    id: Identity,
    object: &'h ObjectCell,
    elements: &'h Elements,
}

impl HostObject for ArrayView<'_> {
    fn own_keys(&self) -> Result<Vec<String>, Unrepresentable> {
        let mut keys: Vec<String> = self.elements.slots.keys().map(|i| i.to_string()).collect();
        keys.extend(own_keys_of(self.object)?);
        Ok(keys)
    }

    fn prototype(&self) -> Result<Option<Identity>, Unrepresentable> {
        reflect(self.object, self.object.prototype)
    }

    fn constructor(&self) -> Result<Option<Identity>, Unrepresentable> {
        reflect(self.object, self.object.constructor)
    }

    fn has_slot(&self, key: &PropertyKey) -> bool {
        if let Some(index) = array_index(key) {
            return self.elements.slots.get(&index).map_or(false, HeapValue::is_defined);
        }
        let name = key_name(key);
        name == "length" || self.heap.has_named_slot(self.object, &name)
    }

    fn is_instance_of(&self, function: Identity) -> bool {
        self.heap.is_instance(self.object.prototype, function)
    }
}

impl HostArray for ArrayView<'_> {
    fn as_object(&self) -> &dyn HostObject {
        self
    }

    fn identity(&self) -> Identity {
        self.id
    }

    fn len(&self) -> usize {
        self.elements.length
    }

    fn element(&self, index: usize) -> ElementKind {
        HeapValue::element_kind(self.elements.slots.get(&index))
    }

    fn has_own_index(&self, offset: f64) -> bool {
        match array_index(&PropertyKey::Number(offset)) {
            Some(index) => self.elements.slots.contains_key(&index),
            None => false,
        }
    }
}

impl HostResolver for Heap {
    fn function_name(&self, function: Identity) -> AnalysisResult<Option<String>> {
        Ok(self.function_name_of(function).map(str::to_string))
    }

    fn prototype_owner_name(&self, prototype: Identity) -> AnalysisResult<Option<String>> {
        Ok(self
            .prototype_owners
            .get(&prototype)
            .and_then(|f| self.function_name_of(*f))
            .map(str::to_string))
    }
}
