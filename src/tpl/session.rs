use crate::tpl::functions::{Function, FunctionTable};
use crate::tpl::validate::Vars;
use crate::value::Value;

/// Per-render evaluation state.
///
/// A session borrows the validated variables of one render call and the
/// shared, read-only function table. Loop bindings live on the session's
/// own stack, so nothing here is ever visible to another render.
pub struct Session<'a> {
    /// The caller's validated variables
    vars: &'a Vars,
    /// Shared built-ins, never mutated
    functions: &'a FunctionTable,
    /// Loop bindings, innermost last; shadow `vars` while a body renders
    locals: Vec<(String, Value)>,
}

impl<'a> Session<'a> {
    pub fn new(vars: &'a Vars, functions: &'a FunctionTable) -> Self {
        Self {
            vars,
            functions,
            locals: Vec::new(),
        }
    }

    /// Binds a loop variable for the body that is about to be rendered.
    pub fn push(&mut self, name: &str, value: Value) {
        self.locals.push((name.to_string(), value));
    }

    pub fn pop(&mut self) {
        self.locals.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        // Innermost loop binding wins, then the caller's variables.
        if let Some((_, v)) = self.locals.iter().rev().find(|(k, _)| k == name) {
            return Some(v);
        }
        self.vars.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&'a Function> {
        self.functions.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::functions::FUNCTIONS;
    use crate::tpl::validate::validate;
    use std::collections::HashMap;

    fn vars() -> Vars {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::Int(1));
        validate(map).unwrap()
    }

    #[test]
    fn test_lookup_simple() {
        let vars = vars();
        let session = Session::new(&vars, &FUNCTIONS);

        assert_eq!(session.lookup("a"), Some(&Value::Int(1)));
        assert_eq!(session.lookup("b"), None);
    }

    #[test]
    fn test_lookup_locals_shadowing() {
        let vars = vars();
        let mut session = Session::new(&vars, &FUNCTIONS);

        session.push("a", Value::Int(2));
        assert_eq!(session.lookup("a"), Some(&Value::Int(2)));

        session.push("a", Value::Int(3));
        assert_eq!(session.lookup("a"), Some(&Value::Int(3)));

        session.pop();
        assert_eq!(session.lookup("a"), Some(&Value::Int(2)));

        session.pop();
        assert_eq!(session.lookup("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_function_lookup() {
        let vars = vars();
        let session = Session::new(&vars, &FUNCTIONS);
        assert!(session.function("replace").is_some());
        assert!(session.function("missing").is_none());
    }
}
