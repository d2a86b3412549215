//! CSV rendering of report records.
//!
//! The artifact schema is fixed: column order and header text never
//! change, timestamps are RFC 3339, rows follow the order the caller
//! supplies (the repository already orders by `registered_at`
//! ascending). Rendering is a pure in-memory transformation, so two
//! runs over the same records produce byte-identical bodies.

use user_reporting_core::report::ReportRecord;

/// Fixed artifact header, in column order.
pub const EXPORT_HEADERS: [&str; 4] = ["UserId", "Username", "Email", "RegisteredAt"];

/// Quote a field if it contains a delimiter, quote, or newline.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render records into the artifact body.
///
/// One header line, then one line per record in the given order.
#[must_use]
pub fn render_rows(records: &[ReportRecord]) -> String {
    let mut body = String::new();
    body.push_str(&EXPORT_HEADERS.join(","));
    body.push('\n');

    for record in records {
        body.push_str(&record.user_id.to_string());
        body.push(',');
        body.push_str(&escape(&record.username));
        body.push(',');
        body.push_str(&escape(&record.email));
        body.push(',');
        body.push_str(&record.registered_at.to_rfc3339());
        body.push('\n');
    }

    body
}
