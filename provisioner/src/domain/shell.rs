//! Building remote shell command lines from untrusted values.

use std::collections::BTreeMap;

/// Single-quote `value` for POSIX `sh`, escaping embedded quotes.
#[must_use]
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render a `.env` file for compose. Keys are validated at submission.
#[must_use]
pub fn env_file(vars: &BTreeMap<String, String>) -> String {
    vars.iter()
        .map(|(key, value)| format!("{key}={}\n", dotenv_value(value)))
        .collect()
}

/// Double-quote a dotenv value. Compose expands `$` and escape sequences
/// inside double quotes, so those are escaped; single quotes and `#` are
/// literal there.
#[must_use]
pub fn dotenv_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '"' => out.push_str(r#"\""#),
            '$' => out.push_str(r"\$"),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Keep the last `n` lines of command output.
#[must_use]
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
