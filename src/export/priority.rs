//! Emission order hints.
//!
//! Ninja picks ready edges in an order that loosely follows their position
//! in the file. Sorting edges so that slow compiles come first and links
//! come as soon as their inputs are ready shortens wall-clock builds in
//! practice. This is best-effort: Ninja makes no ordering promise.

use super::classify::Tool;
use super::model::Edge;

/// Priority of `edge`; lower values are emitted first.
#[must_use]
pub fn priority(edge: &Edge, slow_units: &[String]) -> i32 {
    let primary = edge.primary();
    let tool = Tool::from_name(&edge.rule);
    if edge.rule.ends_with("CXX") && slow_units.iter().any(|unit| primary.contains(unit.as_str())) {
        return 0;
    }
    match tool {
        Some(Tool::Cxx) => 10,
        Some(Tool::ShLink | Tool::Ar) => 20,
        Some(Tool::Link) => 30,
        // Plain C compiles share the late band with shared compiles; only
        // C++ object compiles lead.
        Some(Tool::ShCxx | Tool::ShCc | Tool::Cc) => {
            if primary.contains("third_party") {
                40
            } else {
                50
            }
        }
        _ => -99,
    }
}

/// Stable-sort `edges` by [`priority`].
pub fn annotate(edges: &mut [Edge], slow_units: &[String]) {
    edges.sort_by_cached_key(|edge| priority(edge, slow_units));
}
