//! Bound parameters of one statement.

use std::collections::HashMap;

use warden_proto::Value;

use crate::catalog::FieldType;

/// Parameters of one statement, deduplicated by value and column type.
///
/// Binding the same value twice for columns of the same type yields the same
/// index, so `IN (1, 1, 1)` renders as `IN ($1, $1, $1)` with a single bound
/// value.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    values: Vec<Value>,
    index: HashMap<(&'static str, &'static str, String), usize>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value for a column of type `ty`, returning its 1-based index.
    pub fn bind(&mut self, ty: &FieldType, value: Value) -> usize {
        let key = (ty.kind(), value.type_name(), value.key());
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        self.values.push(value);
        let index = self.values.len();
        self.index.insert(key, index);
        index
    }

    /// Bound values in index order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_value_and_type() {
        let mut params = ParamSet::new();
        assert_eq!(params.bind(&FieldType::Integer, Value::Int(1)), 1);
        assert_eq!(params.bind(&FieldType::Integer, Value::Int(1)), 1);
        assert_eq!(params.bind(&FieldType::Integer, Value::Int(2)), 2);
        // Same value, different column type.
        assert_eq!(params.bind(&FieldType::String, Value::Int(1)), 3);
        assert_eq!(params.values(), &[Value::Int(1), Value::Int(2), Value::Int(1)]);
    }
}
