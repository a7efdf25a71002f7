//! Parsing of `field:direction` key arguments

use anyhow::{anyhow, bail, Result};
use doccontrol_core::index::{IndexDirection, IndexKeys};

/// Parse one `field[:direction]` argument; the direction defaults to ascending
///
/// Accepted directions: `1`, `-1`, `asc`, `desc`, `text`, `hashed`, `2d`, `2dsphere`.
pub fn parse_key(arg: &str) -> Result<(String, IndexDirection)> {
    let (field, direction) = match arg.rsplit_once(':') {
        Some((field, direction)) => (field, direction),
        None => (arg, "1"),
    };
    if field.is_empty() {
        bail!("Missing field name in key '{arg}'");
    }

    let direction = match direction.to_ascii_lowercase().as_str() {
        "1" | "asc" => IndexDirection::Ascending,
        "-1" | "desc" => IndexDirection::Descending,
        "text" => IndexDirection::Text,
        "hashed" => IndexDirection::Hashed,
        "2d" => IndexDirection::Geo2d,
        "2dsphere" => IndexDirection::Geo2dSphere,
        other => return Err(anyhow!("Unknown direction '{other}' in key '{arg}'")),
    };
    Ok((field.to_string(), direction))
}

/// Parse an ordered list of key arguments into a validated key specification
pub fn parse_keys<S: AsRef<str>>(args: &[S]) -> Result<IndexKeys> {
    let keys = args
        .iter()
        .map(|arg| parse_key(arg.as_ref()))
        .try_fold(IndexKeys::new(), |keys, parsed| {
            parsed.map(|(field, direction)| keys.with(field, direction))
        })?;
    keys.validate()?;
    Ok(keys)
}
