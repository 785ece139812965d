/// Argument Helpers
///
/// Typed accessors over `tools/call` arguments. The generic validator only
/// checks presence of required parameters, so handlers use these to read
/// values and enforce their own ranges.

use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::core::error::ToolError;
use crate::core::registry::Arguments;

/// Reads a required, non-empty string argument.
pub fn required_str<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, ToolError> {
    match args.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ToolError::InvalidArgument(format!("{name} must not be empty"))),
        Some(Value::Null) | None => Err(ToolError::InvalidArgument(format!("missing required parameter: {name}"))),
        Some(_) => Err(ToolError::InvalidArgument(format!("{name} must be a string"))),
    }
}

/// Reads an optional string argument. Empty strings count as absent.
pub fn optional_str<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Reads an optional integer argument, falling back to `default` and
/// rejecting values outside `min..=max`.
///
/// JSON clients often send integers as floats; whole-valued floats are
/// accepted.
pub fn bounded_int(args: &Arguments, name: &str, default: i64, min: i64, max: i64) -> Result<i64, ToolError> {
    let value = match args.get(name) {
        None | Some(Value::Null) => default,
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 && f.is_finite() => f as i64,
            _ => return Err(ToolError::InvalidArgument(format!("{name} must be an integer"))),
        },
        Some(_) => return Err(ToolError::InvalidArgument(format!("{name} must be an integer"))),
    };

    if !(min..=max).contains(&value) {
        return Err(ToolError::InvalidArgument(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

pub fn optional_bool(args: &Arguments, name: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ToolError::InvalidArgument(format!("{name} must be a boolean"))),
    }
}

/// Per-application working directory, `<app>/.veracode/<area>`.
pub fn work_dir(application_path: &Path, area: &str) -> PathBuf {
    application_path.join(".veracode").join(area)
}
