//! Built-in helpers

use crate::arguments::CapturedArguments;
use crate::environment::Resolver;
use crate::error::RenderError;
use crate::helper::HelperDefinition;
use crate::value::Value;

pub fn register_builtins(resolver: &Resolver) {
    resolver.register_helper(HelperDefinition::function("concat", concat));
    resolver.register_helper(HelperDefinition::function("array", array));
    resolver.register_helper(HelperDefinition::function("hash", hash));
    resolver.register_helper(HelperDefinition::function("get", get));
    resolver.register_helper(HelperDefinition::function("eq", eq));
    resolver.register_helper(HelperDefinition::function("not", not));
}

fn concat(args: &CapturedArguments) -> Result<Value, RenderError> {
    let text: String = args
        .positional_values()?
        .iter()
        .map(Value::to_text)
        .collect();
    Ok(Value::from(text))
}

fn array(args: &CapturedArguments) -> Result<Value, RenderError> {
    Ok(Value::array(args.positional_values()?))
}

fn hash(args: &CapturedArguments) -> Result<Value, RenderError> {
    Ok(Value::object(args.named_values()?))
}

/// `(get object "a.b")`
fn get(args: &CapturedArguments) -> Result<Value, RenderError> {
    let values = args.positional_values()?;
    let [object, path] = values.as_slice() else {
        return Err(RenderError::invalid_argument(
            "get",
            format!("expected 2 positional arguments, got {}", values.len()),
        ));
    };
    let Value::String(path) = path else {
        return Err(RenderError::invalid_argument("get", "the path must be a string"));
    };
    Ok(path
        .split('.')
        .fold(object.clone(), |current, key| current.get(key)))
}

fn eq(args: &CapturedArguments) -> Result<Value, RenderError> {
    let values = args.positional_values()?;
    match values.as_slice() {
        [a, b] => Ok(Value::Bool(a == b)),
        _ => Err(RenderError::invalid_argument(
            "eq",
            format!("expected 2 positional arguments, got {}", values.len()),
        )),
    }
}

fn not(args: &CapturedArguments) -> Result<Value, RenderError> {
    let values = args.positional_values()?;
    match values.as_slice() {
        [value] => Ok(Value::Bool(!value.truthy())),
        _ => Err(RenderError::invalid_argument(
            "not",
            format!("expected 1 positional argument, got {}", values.len()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;
    use serde_json::json;
    use std::rc::Rc;

    fn positional(values: Vec<Value>) -> CapturedArguments {
        CapturedArguments::new(values.into_iter().map(Reference::constant).collect(), vec![])
    }

    #[test]
    fn test_concat_joins_text() {
        let args = positional(vec![Value::from("a"), Value::from(1i64), Value::Null]);
        assert_eq!(concat(&args).unwrap(), Value::from("a1"));
    }

    #[test]
    fn test_hash_collects_named() {
        let args = CapturedArguments::new(
            vec![],
            vec![(Rc::from("x"), Reference::constant(1i64))],
        );
        assert_eq!(hash(&args).unwrap(), Value::from(json!({"x": 1})));
    }

    #[test]
    fn test_get_walks_paths() {
        let args = positional(vec![
            Value::from(json!({"a": {"b": "deep"}})),
            Value::from("a.b"),
        ]);
        assert_eq!(get(&args).unwrap(), Value::from("deep"));
    }

    #[test]
    fn test_bad_arity_is_reported() {
        let err = eq(&positional(vec![Value::Null])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid arguments to `eq`: expected 2 positional arguments, got 1"
        );
        assert!(matches!(
            get(&positional(vec![Value::Null, Value::from(1i64)])),
            Err(RenderError::InvalidHelperArgument { .. })
        ));
    }
}
