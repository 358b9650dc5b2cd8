//! Deterministic fallback delivered after the last attempt so a failed job
//! never dead-ends the conversation.

use scriptflow_common::ScriptSections;

/// Marks fallback output so downstream consumers (and users) can tell it
/// apart from a generated script.
pub const FALLBACK_MARKER: &str = "⚠️ Draft skeleton";

/// Build the fallback script around the subscriber's own idea.
pub fn fallback_script(idea: &str) -> ScriptSections {
    let idea = idea.trim();
    ScriptSections::new(
        format!("{FALLBACK_MARKER} — we couldn't analyze this reel right now.\nHere's a starting frame for \"{idea}\":"),
        format!(
            "Open with the one thing your audience gets wrong about {idea}.\n\
             Give them the correction in two tight sentences.\n\
             Show one concrete example from your own experience."
        ),
        "Ask them to save this and try it today.".to_string(),
    )
}
