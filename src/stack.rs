use crate::value::Identity;

/// One active invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Identity,
    pub is_constructor: bool,
}

/// Shadow of the observed program's dynamic call nesting
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<StackFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, function: Identity, is_constructor: bool) {
        self.frames.push(StackFrame { function, is_constructor });
    }

    /// Pop the innermost frame regardless of how the invocation ended
    pub fn exit(&mut self) -> Option<StackFrame> {
        let frame = self.frames.pop();
        if frame.is_none() {
            log::warn!("Invocation exit with an empty call stack");
        }
        frame
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
