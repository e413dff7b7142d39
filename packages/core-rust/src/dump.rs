//! Structural dump of call payloads for debug and panic logging.
//!
//! Values are rendered as an indented, type-annotated tree. Output is bounded
//! in depth, container size and string length, and rendering never fails.

use std::any::Any;
use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;

/// Placeholder emitted when a value cannot be rendered.
pub const UNSERIALIZABLE: &str = "unserializable value";

const MAX_DEPTH: usize = 8;
const MAX_ENTRIES: usize = 64;
const MAX_STRING_CHARS: usize = 1024;

/// Renders any serializable value as a structural dump.
#[must_use]
pub fn dump<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(value) => dump_value(&value),
        Err(_) => UNSERIALIZABLE.to_string(),
    }
}

/// Renders an already-converted JSON value.
#[must_use]
pub fn dump_value(value: &Value) -> String {
    let mut out = String::new();
    render(value, 0, &mut out);
    out
}

/// Renders a panic payload.
///
/// Strings, string sequences (`Vec` and arrays of up to four elements) and
/// integers are readable; any other payload yields [`UNSERIALIZABLE`].
#[must_use]
pub fn dump_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return dump(s);
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return dump(s);
    }
    dump_string_sequence(payload)
        .or_else(|| dump_integer(payload))
        .unwrap_or_else(|| UNSERIALIZABLE.to_string())
}

fn dump_string_sequence(payload: &(dyn Any + Send)) -> Option<String> {
    macro_rules! try_sequences {
        ($($ty:ty),* $(,)?) => {
            $(
                if let Some(items) = payload.downcast_ref::<$ty>() {
                    return Some(dump(items));
                }
            )*
        };
    }
    try_sequences!(
        Vec<String>,
        Vec<&'static str>,
        [String; 1],
        [String; 2],
        [String; 3],
        [String; 4],
        [&'static str; 1],
        [&'static str; 2],
        [&'static str; 3],
        [&'static str; 4],
    );
    None
}

fn dump_integer(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(n) = payload.downcast_ref::<i32>() {
        Some(dump(n))
    } else if let Some(n) = payload.downcast_ref::<i64>() {
        Some(dump(n))
    } else if let Some(n) = payload.downcast_ref::<u32>() {
        Some(dump(n))
    } else {
        payload.downcast_ref::<u64>().map(dump)
    }
}

fn render(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Null => out.push_str("(null) null"),
        Value::Bool(b) => {
            let _ = write!(out, "(bool) {b}");
        }
        Value::Number(n) => {
            let _ = write!(out, "(number) {n}");
        }
        Value::String(s) => render_string(s, out),
        Value::Array(items) => {
            let _ = write!(out, "(array, len={}) [", items.len());
            if depth >= MAX_DEPTH {
                out.push_str(" <max depth reached> ]");
                return;
            }
            render_entries(
                items.iter().map(|v| (None, v)),
                items.len(),
                depth,
                out,
            );
            out.push(']');
        }
        Value::Object(map) => {
            let _ = write!(out, "(object, len={}) {{", map.len());
            if depth >= MAX_DEPTH {
                out.push_str(" <max depth reached> }");
                return;
            }
            render_entries(
                map.iter().map(|(k, v)| (Some(k.as_str()), v)),
                map.len(),
                depth,
                out,
            );
            out.push('}');
        }
    }
}

fn render_entries<'a>(
    entries: impl Iterator<Item = (Option<&'a str>, &'a Value)>,
    len: usize,
    depth: usize,
    out: &mut String,
) {
    if len == 0 {
        return;
    }
    let pad = "  ".repeat(depth + 1);
    out.push('\n');
    for (key, value) in entries.take(MAX_ENTRIES) {
        out.push_str(&pad);
        if let Some(key) = key {
            let _ = write!(out, "{key:?}: ");
        }
        render(value, depth + 1, out);
        out.push_str(",\n");
    }
    if len > MAX_ENTRIES {
        let _ = writeln!(out, "{pad}... {} more", len - MAX_ENTRIES);
    }
    out.push_str(&"  ".repeat(depth));
}

fn render_string(s: &str, out: &mut String) {
    let total = s.chars().count();
    if total <= MAX_STRING_CHARS {
        let _ = write!(out, "(string, len={}) {s:?}", s.len());
    } else {
        let head: String = s.chars().take(MAX_STRING_CHARS).collect();
        let _ = write!(
            out,
            "(string, len={}) {head:?}... ({} more chars)",
            s.len(),
            total - MAX_STRING_CHARS
        );
    }
}
