//! Restores the caller's capitalization of result column names.
//!
//! Postgres folds unquoted identifiers to lower case, so `SELECT Job FROM t`
//! comes back as `job`. When enabled, the names written in the query's select
//! list are put back on the materialized columns.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static SELECT_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+(?:distinct\s+)?").expect("select head pattern is valid")
});

static ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\s+as\s+("[^"]*"|[^\s"]+)\s*$"#).expect("alias pattern is valid")
});

/// Parenthesis depth and quote state while walking SQL text.
#[derive(Default)]
struct Nesting {
    depth: i32,
    in_single: bool,
    in_double: bool,
}

impl Nesting {
    /// Account for `ch`; returns true when `ch` sits outside parentheses and quotes.
    fn step(&mut self, ch: char) -> bool {
        let quoted = self.in_single || self.in_double;
        match ch {
            '\'' if !self.in_double => self.in_single = !self.in_single,
            '"' if !self.in_single => self.in_double = !self.in_double,
            '(' if !quoted => self.depth += 1,
            ')' if !quoted => self.depth -= 1,
            _ => return self.depth == 0 && !quoted,
        }
        false
    }
}

/// Text between `SELECT [DISTINCT]` and the first `FROM` that is not inside
/// parentheses or quotes.
fn select_list(sql: &str) -> Option<&str> {
    let head = SELECT_HEAD.find(sql)?;
    let body = &sql[head.end()..];
    let mut nesting = Nesting::default();
    for (i, ch) in body.char_indices() {
        if !nesting.step(ch) || !ch.is_whitespace() {
            continue;
        }
        let after = &body[i + ch.len_utf8()..];
        let is_from = after
            .get(..4)
            .is_some_and(|word| word.eq_ignore_ascii_case("from"))
            && after[4..].starts_with(char::is_whitespace);
        if is_from && i > 0 {
            return Some(&body[..i]);
        }
    }
    None
}

/// Split a select list at commas that are not inside parentheses or quotes.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut nesting = Nesting::default();
    let mut start = 0;
    for (i, ch) in list.char_indices() {
        if nesting.step(ch) && ch == ',' {
            parts.push(&list[start..i]);
            start = i + 1;
        }
    }
    parts.push(&list[start..]);
    parts
}

/// Output name of one select-list item: the alias, else the last word without
/// any `table.` prefix.
fn output_name(item: &str) -> Option<&str> {
    let item = item.trim();
    if item.is_empty() {
        return None;
    }
    let name = match ALIAS.captures(item).and_then(|caps| caps.get(1)) {
        Some(alias) => alias.as_str(),
        None => item.split_whitespace().last()?,
    };
    if name.starts_with('"') {
        return Some(name);
    }
    let name = name.rsplit('.').next().unwrap_or(name);
    if name.is_empty() || name == "*" || name.contains(['(', ')', '\'']) {
        None
    } else {
        Some(name)
    }
}

/// Lower-cased column name to the capitalization used in `sql`.
///
/// Only names with an upper-case letter that occur once in the select list are
/// included; quoted identifiers are left to the engine.
#[must_use]
pub fn capitalization_map(sql: &str) -> HashMap<String, String> {
    let Some(list) = select_list(sql) else {
        return HashMap::new();
    };

    let names: Vec<&str> = split_top_level(list)
        .into_iter()
        .filter_map(output_name)
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for name in &names {
        *counts
            .entry(name.trim_matches('"').to_lowercase())
            .or_default() += 1;
    }

    names
        .into_iter()
        .filter(|name| !name.starts_with('"'))
        .filter(|name| name.chars().any(char::is_uppercase))
        .filter(|name| counts.get(&name.to_lowercase()) == Some(&1))
        .map(|name| (name.to_lowercase(), name.to_string()))
        .collect()
}

/// Rename `columns` in place using [`capitalization_map`] of `sql`.
pub fn apply_capitalization(sql: &str, columns: &mut [String]) {
    let map = capitalization_map(sql);
    if map.is_empty() {
        return;
    }
    for column in columns.iter_mut() {
        if let Some(name) = map.get(&column.to_lowercase()) {
            column.clone_from(name);
        }
    }
}
