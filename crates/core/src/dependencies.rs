//! Dependency extraction over argument expressions.

use std::collections::HashSet;

use crate::future::{ArgValue, FutureRef};

/// Flatten `values` into the futures they reference.
///
/// The walk is depth-first and left to right; keyed structures contribute their
/// values in key order. Each future appears once, at its first occurrence.
/// Literals, including `null`, contribute nothing.
pub fn extract_dependencies<'a, I>(values: I) -> Vec<FutureRef>
where
    I: IntoIterator<Item = &'a ArgValue>,
{
    let mut found = Vec::new();
    for value in values {
        collect(value, &mut found);
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|future| seen.insert(future.id.clone()))
        .cloned()
        .collect()
}

fn collect<'a>(value: &'a ArgValue, found: &mut Vec<&'a FutureRef>) {
    match value {
        ArgValue::Future(future) => found.push(future),
        ArgValue::Sequence(items) => items.iter().for_each(|item| collect(item, found)),
        ArgValue::Struct(fields) => fields.values().for_each(|field| collect(field, found)),
        ArgValue::Null | ArgValue::Bool(_) | ArgValue::Number(_) | ArgValue::String(_) => {}
    }
}
