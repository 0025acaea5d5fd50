//! Placeholder extraction and substitution
//!
//! Templates use single-braced placeholders (`{name}`); doubled braces are
//! literal escapes. Names start with a letter or underscore and may
//! contain letters, digits, underscores, and dots.

use std::collections::{BTreeSet, HashMap};

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Scan a template, invoking `on_placeholder` for each `{name}`
///
/// Returns the rendered output when a substitution map is supplied.
fn scan(
    template: &str,
    mut replace: impl FnMut(&str) -> Option<String>,
    collect_output: bool,
) -> (String, BTreeSet<String>) {
    let mut output = String::with_capacity(if collect_output { template.len() } else { 0 });
    let mut names = BTreeSet::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '{' => {
                // Try to read a placeholder name up to the closing brace
                let mut name = String::new();
                let mut valid = matches!(chars.peek(), Some(&c) if is_name_start(c));
                while valid {
                    match chars.peek() {
                        Some('}') => break,
                        Some(&c) if is_name_char(c) => {
                            name.push(c);
                            chars.next();
                        }
                        _ => {
                            valid = false;
                        }
                    }
                }

                if valid && chars.peek() == Some(&'}') {
                    chars.next();
                    names.insert(name.clone());
                    match replace(&name) {
                        Some(value) => output.push_str(&value),
                        None => {
                            output.push('{');
                            output.push_str(&name);
                            output.push('}');
                        }
                    }
                } else {
                    // Not a placeholder; emit what was consumed literally
                    output.push('{');
                    output.push_str(&name);
                }
            }
            c => output.push(c),
        }
    }

    (output, names)
}

/// The set of placeholders referenced by a template
pub fn extract_placeholders(template: &str) -> BTreeSet<String> {
    scan(template, |_| None, false).1
}

/// Substitute variables into a template
///
/// Returns the rendered text and the names that were referenced but not
/// supplied; callers decide whether missing names are an error.
pub fn substitute(
    template: &str,
    variables: &HashMap<String, String>,
) -> (String, BTreeSet<String>) {
    let mut missing = BTreeSet::new();
    let (rendered, _) = scan(
        template,
        |name| match variables.get(name) {
            Some(value) => Some(value.clone()),
            None => {
                missing.insert(name.to_string());
                None
            }
        },
        true,
    );
    (rendered, missing)
}
