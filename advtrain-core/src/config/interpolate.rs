//! Eager `${a.b.c}` interpolation over a configuration tree.
//!
//! A string that is exactly one reference takes the referenced value with its
//! type (so `batch_size: ${defaults.batch}` stays a number); references embedded
//! in longer strings are substituted textually. References resolve against the
//! root of the tree and may chain; cycles are reported as errors.

use crate::error::ConfigError;
use serde_json::Value;

const MAX_DEPTH: usize = 32;

/// Resolve every interpolation in `root`, returning a tree with no references left.
pub fn interpolate(root: &Value) -> Result<Value, ConfigError> {
    let mut out = root.clone();
    let mut stack = Vec::new();
    resolve_node(root, &mut out, "", &mut stack)?;
    Ok(out)
}

fn join(field: &str, key: &str) -> String {
    if field.is_empty() {
        key.to_string()
    } else {
        format!("{field}.{key}")
    }
}

fn resolve_node(
    root: &Value,
    node: &mut Value,
    field: &str,
    stack: &mut Vec<String>,
) -> Result<(), ConfigError> {
    match node {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                resolve_node(root, value, &join(field, key), stack)?;
            }
        }
        Value::Array(items) => {
            for (i, value) in items.iter_mut().enumerate() {
                resolve_node(root, value, &join(field, &i.to_string()), stack)?;
            }
        }
        Value::String(s) if s.contains("${") => {
            let resolved = resolve_string(root, s, field, stack)?;
            *node = resolved;
        }
        _ => {}
    }
    Ok(())
}

fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.contains("${") && !inner.contains('}')).then_some(inner)
}

fn resolve_string(
    root: &Value,
    s: &str,
    field: &str,
    stack: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    if let Some(reference) = whole_reference(s) {
        return resolve_reference(root, reference.trim(), field, stack);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| ConfigError::Interpolation {
            field: field.to_string(),
            reference: after.to_string(),
        })?;
        let value = resolve_reference(root, after[..end].trim(), field, stack)?;
        out.push_str(&scalar_to_string(&value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn resolve_reference(
    root: &Value,
    reference: &str,
    field: &str,
    stack: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    let unresolvable = || ConfigError::Interpolation {
        field: field.to_string(),
        reference: reference.to_string(),
    };
    if stack.len() >= MAX_DEPTH || stack.iter().any(|r| r == reference) {
        return Err(unresolvable());
    }
    let target = lookup(root, reference).ok_or_else(unresolvable)?;

    stack.push(reference.to_string());
    let mut resolved = target.clone();
    let result = resolve_node(root, &mut resolved, reference, stack);
    stack.pop();
    result?;
    Ok(resolved)
}

/// Look up a dotted path; numeric segments index into arrays.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
