//! Message Builder: a pure function turning a turn path into the
//! provider-agnostic `Message` list a `ProviderAdapter` consumes. No I/O —
//! callers load the path and its blocks from the Turn Store first.

use ts_domain::model::{Message, Turn, TurnBlock};

/// Rough token estimate used only to decide whether to emit a truncation
/// warning; not a tokenizer, just chars/4.
fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.blocks.iter().filter_map(|b| b.text_content.as_ref()).map(|t| t.len()).sum::<usize>())
        .sum::<usize>()
        / 4
}

/// Build the message list for a turn path (root-first, as returned by
/// `TurnStore::get_turn_path`) given each turn's already-loaded blocks.
///
/// When `context_window_tokens` is given and the estimated token count
/// exceeds it, the oldest turns (but never the first/system-establishing
/// turn) are dropped until the remainder fits, mirroring the windowing a
/// real deployment would apply ahead of a provider call.
pub fn build_messages(turns_with_blocks: &[(Turn, Vec<TurnBlock>)], context_window_tokens: Option<usize>) -> Vec<Message> {
    let mut messages: Vec<Message> = turns_with_blocks
        .iter()
        .map(|(turn, blocks)| Message {
            role: turn.role,
            blocks: blocks.clone(),
        })
        .collect();

    if let Some(budget) = context_window_tokens {
        while messages.len() > 1 && estimate_tokens(&messages) > budget {
            messages.remove(0);
        }
    }

    messages
}
