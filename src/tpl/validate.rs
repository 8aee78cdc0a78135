use crate::Result;
use crate::error::TemplateError;
use crate::value::Value;
use std::collections::HashMap;

/// A variable set that has passed [`validate`]: every value is a string,
/// number or boolean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    /// Only `Str`, `Int`, `Float` and `Bool`
    values: HashMap<String, Value>,
}

impl Vars {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

/// Checks that a caller-supplied variable set only holds primitives.
///
/// Lists, maps and nulls are rejected with `NonPrimitiveVariable`. When
/// several keys are offending the smallest one is reported, so the error
/// does not depend on map iteration order.
pub fn validate(values: HashMap<String, Value>) -> Result<Vars> {
    let offending = values
        .iter()
        .filter(|(_, v)| !v.is_primitive())
        .map(|(k, _)| k)
        .min();
    if let Some(key) = offending {
        return Err(TemplateError::NonPrimitiveVariable(key.clone()));
    }
    Ok(Vars { values })
}
