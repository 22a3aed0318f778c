use common_types::{FilterOp, FilterRule};
use serde_json::Value;

/// Look up a dotted path ("data.object.amount") in a JSON value.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate every filter against the payload. Filters are conjunctive; a
/// missing field fails the rule. Failing a filter drops the message without
/// error.
pub fn passes(filters: &[FilterRule], payload: &Value) -> bool {
    filters.iter().all(|rule| matches(rule, payload))
}

fn matches(rule: &FilterRule, payload: &Value) -> bool {
    let Some(actual) = lookup(payload, &rule.field) else {
        return false;
    };

    match rule.op {
        FilterOp::Eq => actual == &rule.value,
        FilterOp::Contains => match (actual, &rule.value) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        FilterOp::Gt => compare(actual, &rule.value).is_some_and(|ord| ord.is_gt()),
        FilterOp::Lt => compare(actual, &rule.value).is_some_and(|ord| ord.is_lt()),
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    let left = left.as_f64()?;
    let right = right.as_f64()?;
    left.partial_cmp(&right)
}
