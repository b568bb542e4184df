//! Text encoding of the layout document.
//!
//! One line per document id: `"{id} {columns} {rows}"`. Only positive odd
//! ids name rows; the even id after each is that row's content stream.

use std::collections::BTreeMap;

use crate::protocol::{content_id, DocumentId};

use super::{Column, SizeHint};

/// Parse the integer a line starts with, skipping leading whitespace.
pub fn leading_integer(line: &str) -> Option<i64> {
    let line = line.trim_start();
    let (sign, digits) = match line.as_bytes().first() {
        Some(b'-') => (-1, &line[1..]),
        Some(b'+') => (1, &line[1..]),
        _ => (1, line),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Row ids named by the layout text, in line order, without duplicates.
pub fn decode_ids(text: &str) -> Vec<DocumentId> {
    let mut ids = Vec::new();
    for line in text.split('\n') {
        let Some(n) = leading_integer(line) else {
            continue;
        };
        if n <= 0 || n % 2 == 0 {
            continue;
        }
        let Ok(id) = DocumentId::try_from(n) else {
            continue;
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Split a line at its first space. The remainder keeps the space.
pub fn split_line(line: &str) -> (&str, &str) {
    match line.find(' ') {
        Some(at) => line.split_at(at),
        None => (line, ""),
    }
}

/// Line remainder encoding a size hint.
pub fn size_suffix(hint: &SizeHint) -> String {
    format!(" {} {}", hint.columns, hint.rows)
}

/// Canonical text for `columns`: label and content line for every row, in
/// column order.
pub fn encode(columns: &[Column], sizes: &BTreeMap<DocumentId, SizeHint>) -> String {
    let mut out = String::new();
    for row in columns.iter().flat_map(|c| c.rows.iter()) {
        for id in [row.id, content_id(row.id)] {
            let hint = sizes.get(&id).copied().unwrap_or_default();
            out.push_str(&id.to_string());
            out.push_str(&size_suffix(&hint));
            out.push('\n');
        }
    }
    out
}
