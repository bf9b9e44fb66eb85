//! The executor's local-variable scope: a stack of frames, one per enclosing
//! `foreach`. The closest frame wins on lookup; assignment to a name not yet
//! declared in any frame creates it in the top frame.

use ahash::AHashMap;

use crate::value::Value;

#[derive(Debug, Default)]
pub struct Scope {
    frames: Vec<AHashMap<String, Value>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![AHashMap::default()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(AHashMap::default());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
        debug_assert!(!self.frames.is_empty(), "must not pop the root frame");
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Writes to the nearest frame already declaring `name`; otherwise
    /// declares it fresh in the top frame. This is what `a = expr;` does.
    pub fn set(&mut self, name: &str, value: Value) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.declare(name, value);
    }

    /// Binds `name` in the top frame unconditionally, shadowing any
    /// outer declaration for the lifetime of that frame. Used to bind the
    /// `foreach` loop variable fresh on every iteration.
    pub fn declare(&mut self, name: &str, value: Value) {
        self.frames
            .last_mut()
            .expect("root frame always present")
            .insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_in_inner_frame_shadows_outer() {
        let mut scope = Scope::new();
        scope.set("i", Value::Number(1.0));
        scope.push_frame();
        scope.declare("i", Value::Number(2.0));
        assert_eq!(scope.get("i"), Some(&Value::Number(2.0)));
        scope.pop_frame();
        assert_eq!(scope.get("i"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn assignment_in_inner_frame_writes_through_to_outer_declaration() {
        let mut scope = Scope::new();
        scope.set("total", Value::Number(0.0));
        scope.push_frame();
        scope.set("total", Value::Number(5.0));
        scope.pop_frame();
        assert_eq!(scope.get("total"), Some(&Value::Number(5.0)));
    }
}


