pub mod labels;
pub mod project;
pub mod tables;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

static NON_NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\d.]").unwrap());
static DOT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+").unwrap());

/// Direct text of an element (child text nodes only), whitespace-collapsed.
/// Matching on direct text keeps a wrapper element from shadowing the
/// label nested inside it.
pub(crate) fn own_text(el: ElementRef) -> String {
    let raw: String = el
        .children()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect();
    normalize(&raw)
}

/// Collapse runs of whitespace (including CR/LF) into single spaces and trim.
pub(crate) fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Full text under an element, cleaned the way extracted values are stored.
/// The parser normalizes CRLF to LF, so bare newlines are removed too.
pub(crate) fn value_text(el: ElementRef) -> String {
    let raw: String = el.text().collect();
    raw.replace("\r\n", "")
        .replace(['\r', '\n'], "")
        .trim()
        .to_string()
}

pub(crate) fn all_elements(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
}

/// Direct child cells (`th` or `td`) of a table row.
pub(crate) fn child_cells<'a>(row: ElementRef<'a>, name: &str) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == name)
        .collect()
}

/// Position of a header cell among its sibling headers. Column alignment is
/// positional, not by name, so header and data rows must line up.
pub(crate) fn column_index(header_row: ElementRef, th: ElementRef) -> Option<usize> {
    child_cells(header_row, "th")
        .iter()
        .position(|c| c.id() == th.id())
}

/// `tr` siblings following a row, within the same table section.
pub(crate) fn following_rows<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    row.next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
}

/// Strip everything but digits and dots, collapsing dot runs. Mirrors how the
/// registry formats numbers ("1,234.50 Sqmts" and the like).
pub(crate) fn clean_number(value: &str) -> String {
    let digits = NON_NUMERIC_RE.replace_all(value, "");
    DOT_RUN_RE.replace_all(&digits, ".").into_owned()
}

/// Lenient float parse; anything unparseable counts as 0.
pub(crate) fn parse_float(value: &str) -> f64 {
    clean_number(value).parse().unwrap_or(0.0)
}

/// Lenient integer parse; anything unparseable (including decimals) counts as 0.
pub(crate) fn parse_int(value: &str) -> i64 {
    clean_number(value).parse().unwrap_or(0)
}
