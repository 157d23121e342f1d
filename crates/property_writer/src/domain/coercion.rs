use common::domain::{DataType, DomainError, DomainResult};
use serde_json::{Number, Value};
use tracing::debug;

/// Convert a routed raw value into the JSON value written to the twin.
///
/// `None` is the null marker and becomes JSON `null`, except for the null
/// type which always writes an empty string.
pub fn coerce_value(data_type: DataType, raw: Option<&str>) -> DomainResult<Value> {
    if data_type == DataType::Null {
        debug!("property has no usable type, writing empty string");
        return Ok(Value::String(String::new()));
    }

    let Some(raw) = raw else {
        return Ok(Value::Null);
    };

    match data_type {
        DataType::Boolean => Ok(Value::Bool(raw.eq_ignore_ascii_case("true"))),
        DataType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| DomainError::Parse(format!("'{}' is not an integer: {}", raw, e))),
        DataType::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| DomainError::Parse(format!("'{}' is not a finite number", raw))),
        DataType::String => Ok(Value::String(raw.to_string())),
        DataType::Object | DataType::Array => serde_json::from_str(raw).map_err(|e| {
            DomainError::Parse(format!("'{}' is not a JSON {}: {}", raw, data_type, e))
        }),
        DataType::Null => Ok(Value::String(String::new())),
    }
}
