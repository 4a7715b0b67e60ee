use std::{borrow::Cow, env, sync::OnceLock};

use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

#[allow(clippy::expect_used)]
fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
            .expect("placeholder pattern is valid")
    })
}

/// Expands `$VAR` and `${VAR}` in every string leaf of `value` from the
/// process environment.
pub(crate) fn interpolate_env(value: &mut Value) {
    interpolate_with(value, &|name| env::var(name).ok());
}

/// Expands placeholders in every string leaf using `lookup`.
///
/// Unknown variables stay as written and `$$` collapses to `$`. Keys and
/// non-string leaves are never touched.
pub(crate) fn interpolate_with(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(text) => {
            if let Cow::Owned(expanded) = expand(text, lookup) {
                *text = expanded;
            }
        }
        Value::Array(items) => {
            for item in items {
                interpolate_with(item, lookup);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_with(item, lookup);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn expand<'a>(text: &'a str, lookup: &dyn Fn(&str) -> Option<String>) -> Cow<'a, str> {
    if !text.contains('$') {
        return Cow::Borrowed(text);
    }

    placeholder().replace_all(text, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }

        let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        lookup(name).unwrap_or_else(|| caps[0].to_string())
    })
}
