//! Environment lookup helpers
//!
//! Config loaders take a lookup function instead of reading `std::env`
//! directly, so tests can feed a map without mutating process state.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Read a process environment variable, treating empty values as unset.
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Look up `key`, falling back to `default` when unset.
pub fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

/// Look up and parse `key`, falling back to `default` when unset.
///
/// A value that is present but unparseable is a config error rather than a
/// silent fallback.
pub fn env_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key} has invalid value {raw:?}: {e}"))),
        None => Ok(default),
    }
}

/// Look up a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
pub fn env_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {raw:?}"))),
    }
}
