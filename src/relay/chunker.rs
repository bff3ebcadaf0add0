//! Split replies into radio-sized pieces.
//!
//! Guarantees, for any input and budget:
//! - concatenating the chunks gives back the input exactly;
//! - no chunk is longer than the budget in bytes, except a single character that
//!   alone exceeds it, which becomes its own chunk;
//! - input that already fits is returned as one chunk.
//!
//! Cuts prefer, in order: the end of a sentence, the end of a clause, any
//! whitespace. A preferred cut is only taken in the back half of the window so
//! chunks don't shrink to a few bytes; otherwise the latest boundary of any kind
//! wins, and a hard cut on a character boundary is the last resort. Whitespace
//! after a cut stays with the earlier chunk.

/// Default chunk budget in bytes.
pub const DEFAULT_CHUNK_BYTES: usize = 200;

const SENTENCE_ALWAYS: &[char] = &['。', '！', '？', '…', '\n'];
const SENTENCE_IF_SPACED: &[char] = &['.', '!', '?'];
const CLAUSE: &[char] = &[',', ';', ':', '，', '；', '：', '、'];

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Sentence = 0,
    Clause = 1,
    Space = 2,
}

pub fn chunk_reply(text: &str, max_bytes: usize) -> Vec<String> {
    let max = max_bytes.max(1);
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let end = floor_char_boundary(rest, max);
        let cut = if end == 0 {
            // One character wider than the whole budget.
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            find_cut(rest, end)
        };
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn classify(c: char, next: Option<char>) -> Option<Tier> {
    if SENTENCE_ALWAYS.contains(&c) {
        Some(Tier::Sentence)
    } else if SENTENCE_IF_SPACED.contains(&c) && next.map_or(true, char::is_whitespace) {
        Some(Tier::Sentence)
    } else if CLAUSE.contains(&c) {
        Some(Tier::Clause)
    } else if c.is_whitespace() {
        Some(Tier::Space)
    } else {
        None
    }
}

/// Extend `pos` over whitespace, staying within `end`.
fn absorb_whitespace(s: &str, mut pos: usize, end: usize) -> usize {
    for c in s[pos..end].chars() {
        if !c.is_whitespace() {
            break;
        }
        pos += c.len_utf8();
    }
    pos
}

/// Best cut position in `(0, end]` for `rest`, where `end < rest.len()`.
fn find_cut(rest: &str, end: usize) -> usize {
    let min = end / 2;
    // Latest boundary seen per tier.
    let mut best = [0usize; 3];
    for (i, c) in rest[..end].char_indices() {
        let after = i + c.len_utf8();
        let next = rest[after..].chars().next();
        if let Some(tier) = classify(c, next) {
            let pos = absorb_whitespace(rest, after, end);
            let slot = &mut best[tier as usize];
            if pos > *slot {
                *slot = pos;
            }
        }
    }
    for tier in [Tier::Sentence, Tier::Clause, Tier::Space] {
        let pos = best[tier as usize];
        if pos > 0 && pos >= min {
            return pos;
        }
    }
    match best.iter().copied().max() {
        Some(pos) if pos > 0 => pos,
        _ => end,
    }
}
