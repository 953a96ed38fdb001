use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Anything outside printable ASCII and the ASCII whitespace controls.
static NON_PRINTABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\x20-\x7E\t\n\r\x0B\x0C]").expect("static pattern compiles")
});

/// Strips every non-printable character from a cell. Retained characters keep their order.
pub fn sanitize_cell(cell: &str) -> String {
    NON_PRINTABLE.replace_all(cell, "").into_owned()
}

pub fn sanitize_row(row: Vec<String>) -> Vec<String> {
    let cleaned: Vec<String> = row.iter().map(|cell| sanitize_cell(cell)).collect();
    let dropped: usize = row
        .iter()
        .zip(&cleaned)
        .map(|(before, after)| before.chars().count() - after.chars().count())
        .sum();
    if dropped > 0 {
        debug!(dropped, "Stripped non-printable characters from row");
    }
    cleaned
}

/// Rounds half-up to a multiple of `step`, for the approximate total in progress lines.
pub fn round_to_nearest(total: usize, step: usize) -> usize {
    if step == 0 {
        return total;
    }
    (total + step / 2) / step * step
}
