//! Turning OCR lines into document text.
//!
//! OCR engines report text one line at a time, in their own reading order. We
//! never try to reconstruct layout: lines are joined in the order given, pages
//! are joined in page order, and all whitespace is collapsed to single spaces.

/// Collapse every run of whitespace (including newlines and tabs) into a
/// single ASCII space, and trim both ends.
///
/// Everything that isn't whitespace is kept exactly as-is, including
/// non-Latin scripts, combining marks and punctuation.
pub fn clean_text(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !cleaned.is_empty() {
            cleaned.push(' ');
        }
        cleaned.push_str(word);
    }
    cleaned
}

/// Join the lines of one page with single spaces, in the order given.
///
/// This does not clean whitespace. Call [`clean_text`] on the result.
pub fn reduce_lines<S: AsRef<str>>(lines: &[S]) -> String {
    join_with_spaces(lines.iter().map(AsRef::as_ref))
}

/// Join already-cleaned page texts into the final document text, in page
/// order.
///
/// Blank pages are skipped so that they don't leave doubled spaces behind.
pub fn reduce_document<S: AsRef<str>>(pages: &[S]) -> String {
    join_with_spaces(
        pages
            .iter()
            .map(AsRef::as_ref)
            .filter(|page| !page.is_empty()),
    )
}

fn join_with_spaces<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}
