//! The one closed operation type this binary serves requests for.
//! `Operation` is deliberately small: it exists to prove out the
//! `map`/`flatMap`/`sketch` RPC surface end to end over a JSON element
//! type, not to be a general expression language. A deployment that
//! needs richer transforms swaps in its own `T`/`O` pair and relinks.

use fractal_core::{DatasetError, Map, Sketch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    Identity,
    MultiplyBy(f64),
    Uppercase,
    Stringify,
    ExplodeArray,
    SplitWhitespace,
    Sum,
    Concat,
}

fn type_mismatch(expected: &'static str, value: &Value) -> DatasetError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    DatasetError::TypeMismatch { expected, found }
}

impl Map<Value, Value> for Operation {
    fn apply(&self, input: &Value) -> Result<Value, DatasetError> {
        match self {
            Operation::Identity => Ok(input.clone()),
            Operation::MultiplyBy(factor) => input
                .as_f64()
                .map(|n| serde_json::json!(n * factor))
                .ok_or_else(|| type_mismatch("number", input)),
            Operation::Uppercase => input
                .as_str()
                .map(|s| Value::String(s.to_uppercase()))
                .ok_or_else(|| type_mismatch("string", input)),
            Operation::Stringify => Ok(Value::String(input.to_string())),
            Operation::ExplodeArray | Operation::SplitWhitespace | Operation::Sum | Operation::Concat => {
                Err(DatasetError::UserCodeFailure(format!(
                    "{self:?} is not a one-to-one map"
                )))
            }
        }
    }
}

impl Map<Value, Vec<Value>> for Operation {
    fn apply(&self, input: &Value) -> Result<Vec<Value>, DatasetError> {
        match self {
            Operation::ExplodeArray => input
                .as_array()
                .cloned()
                .ok_or_else(|| type_mismatch("array", input)),
            Operation::SplitWhitespace => input
                .as_str()
                .map(|s| s.split_whitespace().map(|w| Value::String(w.to_string())).collect())
                .ok_or_else(|| type_mismatch("string", input)),
            other => Err(DatasetError::UserCodeFailure(format!(
                "{other:?} does not expand one element into many"
            ))),
        }
    }
}

impl Sketch<Value, Value> for Operation {
    fn zero(&self) -> Value {
        match self {
            Operation::Concat => Value::String(String::new()),
            _ => serde_json::json!(0.0),
        }
    }

    fn create(&self, input: &Value) -> Result<Value, DatasetError> {
        match self {
            Operation::Sum => input.as_f64().map(|n| serde_json::json!(n)).ok_or_else(|| type_mismatch("number", input)),
            Operation::Concat => input
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| type_mismatch("string", input)),
            other => Err(DatasetError::UserCodeFailure(format!(
                "{other:?} is not a fold"
            ))),
        }
    }

    fn add(&self, a: Value, b: Value) -> Value {
        match self {
            Operation::Concat => {
                let mut s = a.as_str().unwrap_or_default().to_string();
                s.push_str(b.as_str().unwrap_or_default());
                Value::String(s)
            }
            _ => serde_json::json!(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_rejects_non_numbers() {
        let op = Operation::MultiplyBy(2.0);
        assert!(matches!(
            Map::<Value, Value>::apply(&op, &Value::String("x".into())),
            Err(DatasetError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn explode_array_flattens_one_level() {
        let op = Operation::ExplodeArray;
        let out = Map::<Value, Vec<Value>>::apply(&op, &serde_json::json!([1, 2, 3])).unwrap();
        assert_eq!(out, vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
    }

    #[test]
    fn sum_sketch_folds_numbers() {
        let op = Operation::Sum;
        let a = Sketch::<Value, Value>::create(&op, &serde_json::json!(2.0)).unwrap();
        let b = Sketch::<Value, Value>::create(&op, &serde_json::json!(3.0)).unwrap();
        assert_eq!(Sketch::<Value, Value>::add(&op, a, b), serde_json::json!(5.0));
    }
}
