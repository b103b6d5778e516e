use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use objlink_wire::{Origin, Value};
use serde::Serialize;

use crate::exit::{CliError, DATA_INVALID};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ValueOutput {
    kind: &'static str,
    value: serde_json::Value,
}

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ValueOutput {
                kind: kind_name(value),
                value: value_to_json(value),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "VALUE"])
                .add_row(vec![kind_name(value).to_string(), value.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} {}", kind_name(value), value);
        }
        OutputFormat::Raw => match value {
            Value::Str(text) => print_raw(text.as_bytes()),
            other => print_raw(other.to_string().as_bytes()),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Undefined => "undefined",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Double(_) => "double",
        Value::Str(_) => "string",
        Value::Object(_) => "object",
        Value::Function(_) => "function",
    }
}

/// Wire value to plain JSON. References become `{origin, handle}` maps.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::Undefined => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Double(d) => {
            serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Object(r) | Value::Function(r) => serde_json::json!({
            "origin": match r.origin { Origin::Host => "host", Origin::Remote => "remote" },
            "handle": r.handle,
        }),
    }
}

/// Parse one CLI argument (JSON) into a wire value. Integers that fit `i32`
/// stay integers; every other number crosses as a double. Arrays and maps
/// have no wire form and are refused.
pub fn json_arg_to_value(raw: &str) -> Result<Value, CliError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| CliError::new(DATA_INVALID, format!("argument is not JSON: {err}")))?;
    match parsed {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if let Ok(small) = i32::try_from(i) {
                    return Ok(Value::Int(small));
                }
            }
            n.as_f64()
                .map(Value::Double)
                .ok_or_else(|| CliError::new(DATA_INVALID, format!("unrepresentable number {n}")))
        }
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        other => Err(CliError::new(
            DATA_INVALID,
            format!("arrays and maps have no wire form: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_args_map_onto_wire_values() {
        assert_eq!(json_arg_to_value("null").unwrap(), Value::Null);
        assert_eq!(json_arg_to_value("true").unwrap(), Value::Bool(true));
        assert_eq!(json_arg_to_value("42").unwrap(), Value::Int(42));
        assert_eq!(
            json_arg_to_value("4294967296").unwrap(),
            Value::Double(4294967296.0)
        );
        assert_eq!(json_arg_to_value("2.5").unwrap(), Value::Double(2.5));
        assert_eq!(
            json_arg_to_value("\"hi\"").unwrap(),
            Value::Str("hi".into())
        );
    }

    #[test]
    fn structured_json_is_refused() {
        assert!(json_arg_to_value("[1,2]").is_err());
        assert!(json_arg_to_value("{\"a\":1}").is_err());
        assert!(json_arg_to_value("not json").is_err());
    }

    #[test]
    fn doubles_round_trip_through_json_output() {
        assert_eq!(value_to_json(&Value::Double(2.5)), serde_json::json!(2.5));
        assert_eq!(value_to_json(&Value::Undefined), serde_json::Value::Null);
    }
}
