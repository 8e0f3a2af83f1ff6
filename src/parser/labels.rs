//! Label/value adjacency lookups over a parsed detail page.
//!
//! The registry renders captioned panels as a `<label>` (or a bare text
//! element) immediately followed by a sibling `<div>` holding the value, and
//! per-building figures as repeated table blocks whose header/data rows align
//! positionally. Everything here degrades to ""/0 with a diagnostic instead
//! of failing the record.

use scraper::{ElementRef, Html};
use tracing::debug;

use super::{all_elements, child_cells, column_index, following_rows, normalize, own_text, parse_int, value_text};

/// Value associated with `label`, optionally scoped to the panels following a
/// heading element with text `heading`.
///
/// Two lookup strategies, in order:
/// 1. a `<label>` with exactly this text, taking its parent's next `<div>`;
/// 2. any element with exactly this text, taking its own next `<div>`.
pub fn extract_label(doc: &Html, label: &str, heading: Option<&str>) -> String {
    let want = normalize(label);
    let roots = scope_roots(doc, heading);

    for root in &roots {
        for el in root.descendants().filter_map(ElementRef::wrap) {
            if el.value().name() == "label" && own_text(el) == want {
                if let Some(value) = el
                    .parent()
                    .and_then(ElementRef::wrap)
                    .and_then(following_div)
                {
                    return value_text(value);
                }
            }
        }
    }

    for root in &roots {
        for el in root.descendants().filter_map(ElementRef::wrap) {
            if own_text(el) == want {
                if let Some(value) = following_div(el) {
                    return value_text(value);
                }
            }
        }
    }

    debug!("no value found for label '{label}'");
    String::new()
}

/// Sum, across every header cell matching `heading`, the value in the first
/// following data row at the same column index. A table block is repeated per
/// building, each carrying its own header row.
pub fn extract_count(doc: &Html, heading: &str) -> i64 {
    let want = normalize(heading);
    let mut total = 0;

    for th in all_elements(doc).filter(|e| e.value().name() == "th" && own_text(*e) == want) {
        let Some(header_row) = th.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let Some(idx) = column_index(header_row, th) else {
            continue;
        };
        let Some(data_row) = following_rows(header_row).next() else {
            continue;
        };
        match child_cells(data_row, "td").get(idx) {
            Some(cell) => total += parse_int(&value_text(*cell)),
            None => debug!("no cell under '{heading}' at column {idx}"),
        }
    }

    total
}

/// Sum of every numeric cell following a `<td>` whose text equals
/// `task_label`, across the whole document. Used for per-wing task progress;
/// the caller divides by the wing count.
pub fn extract_task_progress(doc: &Html, task_label: &str) -> i64 {
    let want = normalize(task_label);
    let mut total = 0;

    for td in all_elements(doc).filter(|e| e.value().name() == "td" && own_text(*e) == want) {
        for sib in td
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "td")
        {
            total += parse_int(&value_text(sib));
        }
    }

    total
}

/// Search roots: the whole document, or the `<div>`s following the parent of
/// a heading element with the given text.
fn scope_roots<'a>(doc: &'a Html, heading: Option<&str>) -> Vec<ElementRef<'a>> {
    let Some(heading) = heading else {
        return vec![doc.root_element()];
    };
    let want = normalize(heading);

    let mut roots = Vec::new();
    for el in all_elements(doc) {
        if own_text(el) != want {
            continue;
        }
        if let Some(parent) = el.parent().and_then(ElementRef::wrap) {
            roots.extend(
                parent
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "div"),
            );
        }
    }
    if roots.is_empty() {
        debug!("no section found for heading '{heading}'");
    }
    roots
}

fn following_div(el: ElementRef) -> Option<ElementRef> {
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "div")
}
