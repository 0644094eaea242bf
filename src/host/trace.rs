//! Trace replay
//!
//! Replays a recorded JSON event trace against the in-memory [`Heap`],
//! driving the analyzer callbacks in trace order. Trace ids are local to the
//! trace and mapped onto heap identities as objects are declared.
//!
//! ```json
//! [
//!   {"op": "function", "id": 1, "name": "Point"},
//!   {"op": "object", "id": 2, "constructor": 1},
//!   {"op": "enter", "function": 1, "constructor": true},
//!   {"op": "put", "site": 10, "base": {"ref": 2}, "offset": "x", "value": {"num": 1}},
//!   {"op": "exit", "site": 11, "function": 1, "constructor": true, "result": {"ref": 2}},
//!   {"op": "get", "site": 12, "base": {"ref": 2}, "offset": "x"}
//! ]
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::heap::{Heap, HeapValue};
use crate::analyzer::Analyzer;
use crate::error::{replay_error, AnalysisError, AnalysisResult};
use crate::value::{Identity, PropertyKey, Site};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceValue {
    #[default]
    Undefined,
    Null,
    Num(f64),
    Str(String),
    Bool(bool),
    Ref(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceEvent {
    Function {
        id: u64,
        name: String,
    },
    Object {
        id: u64,
        #[serde(default)]
        constructor: Option<u64>,
        #[serde(default)]
        opaque: bool,
    },
    /// `null` entries are holes
    Array {
        id: u64,
        #[serde(default)]
        elements: Vec<Option<TraceValue>>,
    },
    Get {
        site: Site,
        base: TraceValue,
        offset: PropertyKey,
    },
    Put {
        site: Site,
        base: TraceValue,
        offset: PropertyKey,
        #[serde(default)]
        value: TraceValue,
    },
    Enter {
        function: u64,
        #[serde(default)]
        constructor: bool,
    },
    Exit {
        site: Site,
        function: u64,
        #[serde(default)]
        constructor: bool,
        #[serde(default)]
        result: TraceValue,
    },
}

/// Parse a trace file body (a JSON array of events)
pub fn parse_trace(text: &str) -> AnalysisResult<Vec<TraceEvent>> {
    Ok(serde_json::from_str(text)?)
}

#[derive(Default)]
pub struct Replayer {
    heap: Heap,
    ids: FxHashMap<u64, Identity>,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The heap, which also resolves function names for the report
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn identity(&self, id: u64) -> AnalysisResult<Identity> {
        self.ids
            .get(&id)
            .copied()
            .ok_or(AnalysisError::UnknownReference { id })
    }

    fn declare(&mut self, id: u64, identity: Identity) -> AnalysisResult<()> {
        if self.ids.insert(id, identity).is_some() {
            return Err(replay_error(format!("trace id {} declared twice", id)));
        }
        Ok(())
    }

    fn heap_value(&self, value: &TraceValue) -> AnalysisResult<HeapValue> {
        Ok(match value {
            TraceValue::Undefined => HeapValue::Undefined,
            TraceValue::Null => HeapValue::Null,
            TraceValue::Num(n) => HeapValue::Number(*n),
            TraceValue::Str(s) => HeapValue::Str(s.clone()),
            TraceValue::Bool(b) => HeapValue::Bool(*b),
            TraceValue::Ref(id) => HeapValue::Ref(self.identity(*id)?),
        })
    }

    /// Apply one event: declarations mutate the heap, accesses and calls are
    /// reported to `analyzer` (writes after their pre-write callback).
    pub fn apply(&mut self, analyzer: &mut Analyzer, event: &TraceEvent) -> AnalysisResult<()> {
        match event {
            TraceEvent::Function { id, name } => {
                let function = self.heap.define_function(name);
                self.declare(*id, function)?;
            }
            TraceEvent::Object { id, constructor, opaque } => {
                let object = match constructor {
                    Some(function) => {
                        let function = self.identity(*function)?;
                        self.heap.new_object(function)?
                    }
                    None => self.heap.new_plain_object(),
                };
                if *opaque {
                    self.heap.set_opaque(object)?;
                }
                self.declare(*id, object)?;
            }
            TraceEvent::Array { id, elements } => {
                let elements = elements
                    .iter()
                    .map(|slot| slot.as_ref().map(|v| self.heap_value(v)).transpose())
                    .collect::<AnalysisResult<Vec<_>>>()?;
                let array = self.heap.new_array(elements);
                self.declare(*id, array)?;
            }
            TraceEvent::Get { site, base, offset } => {
                let base = self.heap_value(base)?;
                let value = self.heap.get(&base, offset)?;
                let base_view = self.heap.view(&base)?;
                let value_view = self.heap.view(&value)?;
                analyzer.on_field_read(*site, &base_view.as_value(), offset, value_view.as_value());
            }
            TraceEvent::Put { site, base, offset, value } => {
                let base = self.heap_value(base)?;
                let value = self.heap_value(value)?;
                {
                    let base_view = self.heap.view(&base)?;
                    let value_view = self.heap.view(&value)?;
                    analyzer.on_field_write_pre(*site, &base_view.as_value(), offset, value_view.as_value());
                }
                self.heap.put(&base, offset, value)?;
            }
            TraceEvent::Enter { function, constructor } => {
                let function = self.identity(*function)?;
                analyzer.on_invoke_enter(function, *constructor);
            }
            TraceEvent::Exit { site, function, constructor, result } => {
                let function = self.identity(*function)?;
                let result = self.heap_value(result)?;
                let view = self.heap.view(&result)?;
                analyzer.on_invoke_exit(*site, function, view.as_value(), *constructor);
            }
        }
        Ok(())
    }

    /// Replay every event in order; stops at the first malformed event
    pub fn replay(&mut self, analyzer: &mut Analyzer, events: &[TraceEvent]) -> AnalysisResult<usize> {
        for (index, event) in events.iter().enumerate() {
            self.apply(analyzer, event).map_err(|e| {
                log::error!("Trace event {} could not be replayed: {}", index, e);
                e
            })?;
        }
        log::info!("Replayed {} trace events", events.len());
        Ok(events.len())
    }
}
