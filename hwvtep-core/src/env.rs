//! Typed reads of environment variables
use anyhow::Context;

use std::{env, str};

/// `name` parsed as `T`. An unset or non-unicode variable reads as
/// `default`.
pub fn parse_var<T, S>(name: &str, default: S) -> Result<T, <T as str::FromStr>::Err>
where
    T: str::FromStr,
    S: ToString,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
}

/// [`parse_var`] for callers propagating with `anyhow`; the error names the
/// variable.
pub fn parse_var_with_err<T, S>(name: &str, default: S) -> anyhow::Result<T>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    S: ToString,
{
    parse_var::<T, S>(name, default).with_context(|| format!("invalid value in {name}"))
}
