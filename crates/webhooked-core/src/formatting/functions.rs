//! Template function library
//!
//! Every function is pure and total: a failure is logged and the function
//! falls back to the zero value of its return type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use minijinja::Environment;
use minijinja::value::{Rest, Value};
use serde_json::{Map, Value as Json};
use tracing::{error, warn};

/// Register the library on `env`
pub fn register(env: &mut Environment<'_>) {
    env.add_function("default", dft);
    env.add_function("empty", empty);
    env.add_function("coalesce", coalesce);
    env.add_function("toJson", to_json);
    env.add_function("toPrettyJson", to_pretty_json);
    env.add_function("fromJson", from_json);
    env.add_function("ternary", ternary);
    env.add_function("lookup", lookup);
    env.add_function("getHeader", get_header);
    env.add_function("formatTime", format_time);
    env.add_function("parseTime", parse_time);
    env.add_function("toString", to_string);
    env.add_function("toInt", to_int);
    env.add_function("toFloat", to_float);
    env.add_function("toBool", to_bool);
    env.add_function("isNumber", is_number);
    env.add_function("isString", is_string);
    env.add_function("isBool", is_bool);
    env.add_function("isNull", is_null);
    env.add_function("add", math_add);
    env.add_function("sub", math_sub);
    env.add_function("mul", math_mul);
    env.add_function("div", math_div);
    env.add_function("mod", math_mod);
    env.add_function("pow", math_pow);
    env.add_function("min", math_min);
    env.add_function("max", math_max);
    env.add_function("sqrt", math_sqrt);

    // value first functions, usable as `{{ Payload | fromJson }}`; the
    // builtin default, min and max filters are kept
    env.add_filter("empty", empty);
    env.add_filter("coalesce", coalesce);
    env.add_filter("toJson", to_json);
    env.add_filter("toPrettyJson", to_pretty_json);
    env.add_filter("fromJson", from_json);
    env.add_filter("formatTime", format_time);
    env.add_filter("parseTime", parse_time);
    env.add_filter("toString", to_string);
    env.add_filter("toInt", to_int);
    env.add_filter("toFloat", to_float);
    env.add_filter("toBool", to_bool);
    env.add_filter("isNumber", is_number);
    env.add_filter("isString", is_string);
    env.add_filter("isBool", is_bool);
    env.add_filter("isNull", is_null);
    env.add_filter("add", math_add);
    env.add_filter("sub", math_sub);
    env.add_filter("mul", math_mul);
    env.add_filter("div", math_div);
    env.add_filter("mod", math_mod);
    env.add_filter("pow", math_pow);
    env.add_filter("sqrt", math_sqrt);
}

fn json(value: &Value) -> Json {
    serde_json::to_value(value).unwrap_or(Json::Null)
}

fn empty_json(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::Bool(_) => false,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
    }
}

/// `given` when it is not empty, `dft` otherwise
pub fn dft(dft: Value, given: Rest<Value>) -> Value {
    match given.first() {
        Some(value) if !empty(value.clone()) => value.clone(),
        _ => dft,
    }
}

/// Whether the value is undefined, none, zero or of length zero. Booleans are never empty.
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    empty_json(&json(&value))
}

/// First value that is not null
pub fn coalesce(values: Rest<Value>) -> Value {
    values
        .iter()
        .find(|v| !is_null((*v).clone()))
        .cloned()
        .unwrap_or(Value::from(()))
}

/// Compact JSON encoding
pub fn to_json(value: Value) -> String {
    serde_json::to_string(&value).unwrap_or_else(|err| {
        error!(error = %err, "Failed to marshal to JSON");
        String::new()
    })
}

/// JSON encoding indented with two spaces
pub fn to_pretty_json(value: Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|err| {
        error!(error = %err, "Failed to marshal to JSON");
        String::new()
    })
}

/// Decode a JSON object. Null, non-object and invalid input decode to an empty map.
pub fn from_json(value: Value) -> Value {
    if is_null(value.clone()) {
        return Value::from_serialize(Map::new());
    }

    let object = match json(&value) {
        Json::Object(object) => object,
        Json::String(raw) => serde_json::from_str::<Map<String, Json>>(&raw).unwrap_or_else(|err| {
            error!(error = %err, "Failed to unmarshal JSON");
            Map::new()
        }),
        other => {
            error!(found = %other, "Failed to unmarshal JSON, expected a string");
            Map::new()
        }
    };
    Value::from_serialize(object)
}

/// `is_true` when `condition` holds, `is_false` otherwise
pub fn ternary(is_true: Value, is_false: Value, condition: Value) -> Value {
    if condition.is_true() { is_true } else { is_false }
}

/// Walk `data` along a dot separated path. A missing segment yields none.
pub fn lookup(path: String, data: Value) -> Value {
    if path.is_empty() {
        return data;
    }

    let mut current = json(&data);
    for key in path.split('.') {
        current = match current {
            Json::Object(mut object) => match object.remove(key) {
                Some(next) => next,
                None => {
                    warn!(path = %path, "Key not found on the object");
                    return Value::from(());
                }
            },
            _ => return Value::from(()),
        };
    }
    Value::from_serialize(current)
}

/// Value of header `name`, matched case-insensitively; empty when absent
pub fn get_header(name: String, headers: Value) -> String {
    let Json::Object(headers) = json(&headers) else {
        error!("Headers are null, returning an empty string");
        return String::new();
    };

    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        .map(|(_, value)| match value {
            Json::Array(values) => values.first().map(json_to_string).unwrap_or_default(),
            other => json_to_string(other),
        })
        .unwrap_or_default()
}

/// Reformat a time. Integers are Unix seconds, strings are parsed with
/// `from_layout` (RFC 3339 when empty). `to_layout` defaults to RFC 3339.
pub fn format_time(time: Value, from_layout: Option<String>, to_layout: Option<String>) -> String {
    if is_null(time.clone()) {
        error!("Time is null, returning an empty string");
        return String::new();
    }

    let from_layout = from_layout.unwrap_or_default();
    let Some(parsed) = parse_datetime(&json(&time), &from_layout) else {
        error!(time = %time, layout = %from_layout, "Failed to parse time");
        return String::new();
    };

    match to_layout.as_deref() {
        None | Some("") => parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Some(layout) => parsed.format(layout).to_string(),
    }
}

/// Parse a time into its RFC 3339 form, none on failure
pub fn parse_time(time: Value, layout: Option<String>) -> Value {
    if is_null(time.clone()) {
        return Value::from(());
    }

    match parse_datetime(&json(&time), layout.as_deref().unwrap_or_default()) {
        Some(parsed) => Value::from(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        None => {
            error!(time = %time, "Failed to parse time");
            Value::from(())
        }
    }
}

fn parse_datetime(time: &Json, layout: &str) -> Option<DateTime<Utc>> {
    match time {
        Json::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        Json::String(s) if layout.is_empty() => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Json::String(s) => DateTime::parse_from_str(s, layout)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|_| NaiveDateTime::parse_from_str(s, layout).map(|t| t.and_utc()))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, layout)
                    .ok()?
                    .and_hms_opt(0, 0, 0)
                    .map(|t| t.and_utc())
            }),
        _ => None,
    }
}

fn json_to_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        },
        Json::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// String form of a scalar, empty for null and collections
pub fn to_string(value: Value) -> String {
    if is_null(value.clone()) {
        return String::new();
    }
    json_to_string(&json(&value))
}

/// Integer form of the value, 0 when it does not parse
pub fn to_int(value: Value) -> i64 {
    if is_null(value.clone()) {
        return 0;
    }
    let raw = to_string(value);
    raw.parse().unwrap_or_else(|err| {
        error!(value = %raw, error = %err, "Failed to convert to int");
        0
    })
}

/// Float form of the value, 0 when it does not parse
pub fn to_float(value: Value) -> f64 {
    if is_null(value.clone()) {
        return 0.0;
    }
    let raw = to_string(value);
    raw.parse().unwrap_or_else(|err| {
        error!(value = %raw, error = %err, "Failed to convert to float");
        0.0
    })
}

/// Boolean form of the value, false when it does not parse
pub fn to_bool(value: Value) -> bool {
    if is_null(value.clone()) {
        return false;
    }
    let raw = to_string(value);
    parse_bool(&raw).unwrap_or_else(|| {
        error!(value = %raw, "Failed to convert to bool");
        false
    })
}

/// Whether the value is a finite, non zero number
pub fn is_number(value: Value) -> bool {
    if is_null(value.clone()) {
        return false;
    }
    matches!(json(&value), Json::Number(n) if n.as_f64().is_some_and(f64::is_finite))
}

/// Whether the value is a non empty string
pub fn is_string(value: Value) -> bool {
    !is_null(value.clone()) && matches!(json(&value), Json::String(_))
}

/// Whether the value is a bool or a string holding one
pub fn is_bool(value: Value) -> bool {
    if is_null(value.clone()) {
        return false;
    }
    match json(&value) {
        Json::Bool(_) => true,
        Json::String(s) => parse_bool(&s).is_some(),
        _ => false,
    }
}

/// Whether the value is none, undefined or empty
pub fn is_null(value: Value) -> bool {
    empty(value)
}

fn floats(values: &Rest<Value>) -> impl Iterator<Item = f64> + '_ {
    values.iter().map(|v| to_float(v.clone()))
}

fn fold_from_first(values: &Rest<Value>, op: impl Fn(f64, f64) -> f64) -> f64 {
    let mut numbers = floats(values);
    let Some(first) = numbers.next() else {
        return 0.0;
    };
    numbers.fold(first, op)
}

/// Sum of the operands
pub fn math_add(values: Rest<Value>) -> f64 {
    floats(&values).sum()
}

/// First operand minus every other one
pub fn math_sub(values: Rest<Value>) -> f64 {
    fold_from_first(&values, |acc, n| acc - n)
}

/// Product of the operands. A zero accumulator is replaced by the next operand.
pub fn math_mul(values: Rest<Value>) -> f64 {
    floats(&values).fold(0.0, |acc, n| if acc == 0.0 { n } else { acc * n })
}

/// First operand divided by every other one
pub fn math_div(values: Rest<Value>) -> f64 {
    fold_from_first(&values, |acc, n| acc / n)
}

/// Remainder of the first operand by every other one
pub fn math_mod(values: Rest<Value>) -> f64 {
    fold_from_first(&values, |acc, n| acc % n)
}

/// First operand raised to every other one
pub fn math_pow(values: Rest<Value>) -> f64 {
    fold_from_first(&values, f64::powf)
}

/// Smallest operand
pub fn math_min(values: Rest<Value>) -> f64 {
    fold_from_first(&values, f64::min)
}

/// Largest operand
pub fn math_max(values: Rest<Value>) -> f64 {
    fold_from_first(&values, f64::max)
}

/// Square root of the operand
pub fn math_sqrt(value: Value) -> f64 {
    to_float(value).sqrt()
}
