//! Small string helpers shared by the template engine and row binding

/// Replaces every character found in `table` with its mapped text.
pub(crate) fn replace_chars<S: AsRef<str>>(src: &str, table: &[(char, S)]) -> String {
    let mut out = String::with_capacity(src.len());
    'chars: for c in src.chars() {
        for (from, to) in table {
            if c == *from {
                out.push_str(to.as_ref());
                continue 'chars;
            }
        }
        out.push(c);
    }
    out
}

/// Appends `s` as a SQL string literal: wrapped in single quotes with
/// embedded quotes doubled.
pub(crate) fn escape_sql_string(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
}

/// Collapses doubled `bracket` characters into single ones.
pub(crate) fn replace_bracket(src: &str, bracket: char) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == bracket && chars.peek() == Some(&bracket) {
            chars.next();
        }
    }
    out
}

const MAX_LOGGED_REQUEST: usize = 3 * 1024;

/// Caps very long request text for error messages; the full text still goes
/// to the log.
pub(crate) fn truncate_request(sql: &str) -> String {
    match sql.char_indices().nth(MAX_LOGGED_REQUEST) {
        None => sql.to_string(),
        Some((at, _)) => {
            let mut out = String::with_capacity(at + 64);
            out.push_str(&sql[..at]);
            out.push_str(" ... (Request has been shortened. Please turn to the log.)");
            out
        }
    }
}
