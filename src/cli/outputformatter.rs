use std::collections::BTreeMap;

use serde_json::Value;
use terminal_size::{terminal_size, Width};

use crate::auth::UserRecord;

fn get_terminal_width() -> usize {
    if let Some((Width(w), _)) = terminal_size() {
        (w as usize).max(40)
    } else {
        120
    }
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (cell, w) in cells.iter().zip(widths.iter()) {
        let mut c = cell.clone();
        // Truncate on char boundaries; byte indexing panics mid-codepoint.
        if c.chars().count() > *w {
            c = c.chars().take(w.saturating_sub(1)).collect();
            c.push('…');
        }
        s.push_str(&format!(" {:<width$} |", c, width = w));
    }
    s
}

fn fit_line_to_width(line: &str, termw: usize) -> String {
    if line.chars().count() <= termw {
        line.to_string()
    } else {
        line.chars().take(termw).collect()
    }
}

fn print_table(cols: Vec<String>, rows: Vec<Vec<String>>) {
    let termw = get_terminal_width();
    crate::tprintln!("[cli.outputformatter] detected terminal width={} columns", termw);
    let per_col_cap = (termw / cols.len().max(1)).saturating_sub(3).max(6);
    let mut widths: Vec<usize> = cols.iter().map(|s| s.chars().count().min(per_col_cap)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = cell.chars().count().min(per_col_cap);
            if w > widths[i] {
                widths[i] = w;
            }
        }
    }
    let sep = build_separator(&widths);
    println!("{}", fit_line_to_width(&sep, termw));
    println!("{}", fit_line_to_width(&build_row(&cols, &widths), termw));
    println!("{}", fit_line_to_width(&sep, termw));
    for r in &rows {
        println!("{}", fit_line_to_width(&build_row(r, &widths), termw));
    }
    println!("{}", fit_line_to_width(&sep, termw));
    println!("rows: {}", rows.len());
}

/// Render the credential table as an ASCII table. Passwords are deliberately
/// not printed even though the records carry them.
pub fn print_users_table(users: &BTreeMap<String, UserRecord>) {
    let cols = vec!["key".to_string(), "email".to_string(), "name".to_string(), "role".to_string()];
    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|(k, u)| {
            vec![k.clone(), u.email.clone(), u.name.clone(), u.role.as_str().to_string()]
        })
        .collect();
    print_table(cols, rows);
}

fn flatten(prefix: &str, v: &Value, out: &mut Vec<(String, String)>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                flatten(&key, child, out);
            }
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Render an arbitrary JSON snapshot (e.g. the /sensors summary) as key/value
/// rows, flattening nested objects with dotted keys.
pub fn print_value_table(v: &Value) {
    let mut pairs: Vec<(String, String)> = Vec::new();
    flatten("", v, &mut pairs);
    if pairs.is_empty() {
        println!("{}", v);
        return;
    }
    let cols = vec!["key".to_string(), "value".to_string()];
    let rows = pairs.into_iter().map(|(k, val)| vec![k, val]).collect();
    print_table(cols, rows);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_produces_dotted_keys() {
        let mut out = Vec::new();
        flatten("", &json!({"a": {"b": 1, "c": "x"}, "d": true}), &mut out);
        assert!(out.contains(&("a.b".to_string(), "1".to_string())));
        assert!(out.contains(&("a.c".to_string(), "\"x\"".to_string())));
        assert!(out.contains(&("d".to_string(), "true".to_string())));
    }

    #[test]
    fn rows_are_truncated_to_width() {
        let row = build_row(&["abcdefgh".to_string()], &[4]);
        assert!(row.contains("abc…"));
    }

    #[test]
    fn truncation_is_char_safe_for_non_ascii() {
        // A cut that would land mid-codepoint must not panic.
        let row = build_row(&["éeeeee".to_string()], &[2]);
        assert!(row.contains("é…"));
        let row = build_row(&["αβγδεζ".to_string()], &[4]);
        assert!(row.contains("αβγ…"));
    }
}
