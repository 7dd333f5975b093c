use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ExtractError;

/// Raw `data-real-value` cells of one table row, in column order.
pub type Row = Vec<String>;

/// Rows the provider appends after the requested range. Always removed from the end.
pub const TRAILING_FOOTER_ROWS: usize = 1;

const VALUE_ATTR: &str = "data-real-value";

static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html > body").expect("body selector is valid"));

static ROW_PATH: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("html > body > div > table > tbody > tr").expect("row selector is valid")
});

/// Extract the historical-data table from a provider HTML fragment.
///
/// The fragment must consist of a single top-level element with no text around it. Only `tr`
/// elements at exactly `html/body/div/table/tbody/tr` are considered. A document without such
/// rows is rejected rather than treated as an empty history. The last row found is a footer and
/// is dropped, so a single-row document yields an empty table.
pub fn extract_rows(html: &str) -> Result<Vec<Row>, ExtractError> {
    let document = Html::parse_document(html);
    check_single_root(&document)?;
    let mut rows: Vec<Row> = document.select(&ROW_PATH).map(row_values).collect();

    if rows.is_empty() {
        return Err(ExtractError::InvalidDocument);
    }
    debug!(rows = rows.len(), "parsed history table");

    rows.truncate(rows.len().saturating_sub(TRAILING_FOOTER_ROWS));
    Ok(rows)
}

fn check_single_root(document: &Html) -> Result<(), ExtractError> {
    let Some(body) = document.select(&BODY).next() else {
        return Err(ExtractError::MalformedFragment("no body"));
    };

    let mut elements = 0;
    for node in body.children() {
        let value = node.value();
        if value.is_element() {
            elements += 1;
        } else if value.as_text().is_some_and(|text| !text.trim().is_empty()) {
            return Err(ExtractError::MalformedFragment("text outside the top-level element"));
        }
    }

    match elements {
        0 => Err(ExtractError::MalformedFragment("no elements found")),
        1 => Ok(()),
        _ => Err(ExtractError::MalformedFragment("multiple top-level elements")),
    }
}

fn row_values(tr: ElementRef<'_>) -> Row {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| cell.value().name() == "td")
        .filter_map(|td| td.value().attr(VALUE_ATTR))
        .map(str::to_string)
        .collect()
}
