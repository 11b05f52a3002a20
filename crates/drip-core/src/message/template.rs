//! `{{name}}` / `{{name:default}}` substitution for message templates.

use std::fmt;

/// Error raised while expanding a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    /// Byte offset of the offending `{{`.
    pub position: usize,
    pub message: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template error at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for TemplateError {}

/// Expand placeholders in `source`, left to right.
///
/// - `{{ NAME }}`: replaced by `resolve(NAME)`; error if it yields `None`.
/// - `{{ NAME:default }}`: `default` when `resolve` yields `None`.
///
/// NAME matches `[A-Za-z_][A-Za-z0-9_.]*` (dots address nested fields).
/// Whitespace inside the braces is ignored. A single `{` is literal.
pub fn render_template<F>(source: &str, mut resolve: F) -> Result<String, TemplateError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let position = offset + start;
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError {
                position,
                message: "unterminated placeholder, missing '}}'".to_string(),
            });
        };

        let inner = &after_open[..end];
        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (inner.trim(), None),
        };
        if !is_placeholder_name(name) {
            return Err(TemplateError {
                position,
                message: format!("invalid placeholder name {name:?}"),
            });
        }

        match (resolve(name), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => {
                return Err(TemplateError {
                    position,
                    message: format!("undefined placeholder {name:?}"),
                });
            }
        }

        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

/// Minimal HTML escaping for values spliced into `text/html` bodies.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
