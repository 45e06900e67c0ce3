//! Small helpers shared across modules.

use std::error::Error;

/// Render an error followed by each of its sources, joined with `": "`.
///
/// Transport errors from hyper keep the useful part ("Connection refused")
/// in the source chain, while their own `Display` is generic.
///
/// - `client error (Connect): tcp connect error: Connection refused (os error 111)`
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // Some wrappers repeat their source's message verbatim.
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}
