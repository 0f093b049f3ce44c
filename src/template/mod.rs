//! Evaluation of `@…` templates against a [`Context`].
//!
//! Templates are plain text with embedded lookups: `@contact.name` or the
//! parenthesized form `@(contact.name)`. `@@` escapes a literal `@`. The
//! expression *language* lives outside this crate; only the dotted-path value
//! contract is implemented here.

use crate::context::Context;
use crate::values::{EvalError, Value};

/// Evaluates a single expression (a dotted path) to a value.
pub fn evaluate_expression(expression: &str, context: &Context) -> Value {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Value::error("empty expression");
    }
    let segments: Vec<&str> = trimmed.split('.').collect();
    if segments.iter().any(|s| !is_identifier(s)) {
        return Value::error(format!("unable to parse expression '{}'", trimmed));
    }
    context.resolve(&segments)
}

/// Substitutes every `@…` fragment in `template`, collecting the evaluation
/// errors. Errors substitute as empty strings; callers surface them as error
/// events.
pub fn evaluate_template(template: &str, context: &Context) -> (String, Vec<EvalError>) {
    let mut output = String::with_capacity(template.len());
    let mut errors = Vec::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '@' {
            output.push(chars[i]);
            i += 1;
            continue;
        }

        // escaped @@
        if chars.get(i + 1) == Some(&'@') {
            output.push('@');
            i += 2;
            continue;
        }

        // parenthesized form
        if chars.get(i + 1) == Some(&'(') {
            if let Some(end) = matching_paren(&chars, i + 1) {
                let expr: String = chars[i + 2..end].iter().collect();
                push_value(evaluate_expression(&expr, context), &mut output, &mut errors);
                i = end + 1;
                continue;
            }
            // unterminated, treat as literal
            output.push('@');
            i += 1;
            continue;
        }

        // bare identifier path
        let start = i + 1;
        let mut end = start;
        while end < chars.len()
            && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '.')
        {
            end += 1;
        }
        // trailing dots belong to the surrounding prose, not the path
        while end > start && chars[end - 1] == '.' {
            end -= 1;
        }

        if end == start || !chars[start].is_alphabetic() {
            output.push('@');
            i += 1;
            continue;
        }

        let expr: String = chars[start..end].iter().collect();
        push_value(evaluate_expression(&expr, context), &mut output, &mut errors);
        i = end;
    }

    (output, errors)
}

fn push_value(value: Value, output: &mut String, errors: &mut Vec<EvalError>) {
    match value {
        Value::Error(e) => errors.push(e),
        other => output.push_str(&other.to_repr()),
    }
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (offset, c) in chars[open..].iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
