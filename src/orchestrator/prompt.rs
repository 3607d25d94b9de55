//! Serialization of caller context into a bounded prompt.

use std::fmt::Write as _;

use crate::config::ContextLimits;
use crate::models::context::Context;

/// Appended to content cut at the character ceiling.
pub const TRUNCATION_MARKER: &str = "\n[... content truncated]";

/// Build the prompt for `question` with `contexts` prepended.
///
/// A single item is bounded by `single_item_chars`; with several items each
/// one is bounded by `multi_item_chars`. Without context the question is
/// returned unchanged.
#[must_use]
pub fn build_prompt(question: &str, contexts: &[Context], limits: &ContextLimits) -> String {
    if contexts.is_empty() {
        return question.to_owned();
    }

    let ceiling = if contexts.len() == 1 {
        limits.single_item_chars
    } else {
        limits.multi_item_chars
    };

    let mut prompt = String::new();
    if contexts.len() == 1 {
        prompt.push_str("The user is looking at the following item.\n\n");
    } else {
        let _ = writeln!(
            prompt,
            "The user is looking at the following {} items.\n",
            contexts.len()
        );
    }

    for context in contexts {
        prompt.push_str(&render_context(context, ceiling, limits.max_child_names));
        prompt.push_str("\n\n");
    }

    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt
}

/// Render one context item; the body never exceeds `ceiling` characters.
#[must_use]
pub fn render_context(context: &Context, ceiling: usize, max_child_names: usize) -> String {
    let path = context.path.display();

    if context.is_folder {
        let children = context.child_names.as_deref().unwrap_or_default();
        let listed: Vec<&str> = children
            .iter()
            .take(max_child_names)
            .map(String::as_str)
            .collect();
        let mut listing = listed.join("\n");
        if children.len() > listed.len() {
            let _ = write!(listing, "\n(and {} more)", children.len() - listed.len());
        }
        if listing.is_empty() {
            listing.push_str("(empty folder)");
        }
        return format!(
            "Folder \"{}\" ({path}) contains:\n{}",
            context.name,
            truncate_chars(&listing, ceiling)
        );
    }

    let body = context
        .content
        .as_deref()
        .map_or_else(|| "(content unavailable)".to_owned(), |c| truncate_chars(c, ceiling));

    format!(
        "--- BEGIN {name} ({path}) ---\n{body}\n--- END {name} ---",
        name = context.name
    )
}

/// Cut `text` so that, including [`TRUNCATION_MARKER`], it fits in `ceiling`
/// characters. Text already within the ceiling is returned unchanged.
#[must_use]
pub fn truncate_chars(text: &str, ceiling: usize) -> String {
    if text.chars().count() <= ceiling {
        return text.to_owned();
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    let keep = ceiling.saturating_sub(marker_len);
    let mut cut: String = text.chars().take(keep).collect();
    if ceiling >= marker_len {
        cut.push_str(TRUNCATION_MARKER);
    }
    cut
}
