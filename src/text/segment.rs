//! Sentence segmentation.
//!
//! VoxCPM degrades on long inputs, so text is cut into sentences that are
//! synthesized one by one. Latin text is split conservatively (only long
//! passages, only at clear sentence ends) because English prosody suffers
//! from over-splitting; Kazakh and Chinese text is split at every terminator.

use super::lang::{classify_body, Script};

/// Upper bound on sentence length (in characters) handed to the model.
pub const MAX_SENTENCE_CHARS: usize = 250;

/// Latin bodies up to this length are synthesized whole.
const LATIN_WHOLE_LIMIT: usize = 300;

/// Latin pieces accumulate until they exceed this length.
const LATIN_ACCUMULATE_CHARS: usize = 200;

/// Replace line breaks and whitespace runs with single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences ready for synthesis.
///
/// Returns an empty list only when `text` has no visible characters.
pub fn segment(text: &str) -> Vec<String> {
    let text = collapse_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }

    let script = classify_body(&text);
    let raw = if script == Script::Latin {
        split_latin(&text)
    } else {
        split_terminated(&text)
    };

    let mut sentences = Vec::with_capacity(raw.len());
    for sentence in raw {
        if char_len(&sentence) <= MAX_SENTENCE_CHARS {
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
        } else {
            sentences.extend(split_long(&sentence, script));
        }
    }
    sentences
}

/// Token budget for one sentence.
///
/// A prompt cache makes the model produce roughly 3-4 patches per character,
/// without one roughly 2-3.
pub fn utterance_max_len(sentence: &str, has_prompt: bool) -> usize {
    let chars = char_len(sentence);
    if has_prompt {
        (chars * 4 + 25).min(200)
    } else {
        (chars * 3 + 25).min(150)
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn is_latin_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn is_terminal(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？' | '…' | '.' | '!' | '?')
}

fn is_clause_mark(ch: char) -> bool {
    matches!(ch, ',' | '，' | ';' | '；')
}

fn split_latin(text: &str) -> Vec<String> {
    if char_len(text) <= LATIN_WHOLE_LIMIT {
        return vec![text.to_string()];
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for piece in latin_pieces(text) {
        current.push_str(piece);
        if char_len(&current) > LATIN_ACCUMULATE_CHARS && ends_with_terminal_gap(&current) {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    if sentences.is_empty() {
        sentences.push(text.to_string());
    }
    sentences
}

/// Cut Latin text around `[.!?]+\s+` runs that precede an uppercase letter.
///
/// Delimiters are kept as their own pieces.
fn latin_pieces(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut pieces = Vec::new();
    let mut last = 0;
    let mut i = 0;

    while i < chars.len() {
        if !is_latin_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < chars.len() && is_latin_terminal(chars[j].1) {
            j += 1;
        }
        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        if k > j && k < chars.len() && chars[k].1.is_ascii_uppercase() {
            let (start, end) = (chars[i].0, chars[k].0);
            pieces.push(&text[last..start]);
            pieces.push(&text[start..end]);
            last = end;
            i = k;
        } else {
            i = j;
        }
    }

    pieces.push(&text[last..]);
    pieces
}

fn ends_with_terminal_gap(text: &str) -> bool {
    let body = text.trim_end();
    body.len() < text.len() && body.ends_with(is_latin_terminal)
}

/// Split after every run of sentence terminators, keeping the terminators.
fn split_terminated(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let run_ends = is_terminal(ch) && !chars.peek().is_some_and(|next| is_terminal(*next));
        if run_ends {
            if !current.trim().is_empty() {
                sentences.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current);
    }

    if sentences.is_empty() {
        sentences.push(text.to_string());
    }
    sentences
}

/// Re-split an over-long sentence at clause boundaries and pack the pieces
/// into chunks of at most [`MAX_SENTENCE_CHARS`].
fn split_long(sentence: &str, script: Script) -> Vec<String> {
    let pieces = if script == Script::Latin {
        latin_clause_pieces(sentence)
    } else {
        clause_pieces(sentence)
    };

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if char_len(&current) + char_len(piece) <= MAX_SENTENCE_CHARS {
            current.push_str(piece);
        } else {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            current = piece.to_string();
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Pieces around `,\s+` delimiters (delimiters kept).
fn latin_clause_pieces(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut pieces = Vec::new();
    let mut last = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i].1 == ',' {
            let mut k = i + 1;
            while k < chars.len() && chars[k].1.is_whitespace() {
                k += 1;
            }
            if k > i + 1 {
                let start = chars[i].0;
                let end = chars.get(k).map_or(text.len(), |(idx, _)| *idx);
                pieces.push(&text[last..start]);
                pieces.push(&text[start..end]);
                last = end;
                i = k;
                continue;
            }
        }
        i += 1;
    }

    pieces.push(&text[last..]);
    pieces
}

/// Pieces around runs of `,，;；` (delimiters kept).
fn clause_pieces(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut pieces = Vec::new();
    let mut last = 0;
    let mut i = 0;

    while i < chars.len() {
        if is_clause_mark(chars[i].1) {
            let mut k = i;
            while k < chars.len() && is_clause_mark(chars[k].1) {
                k += 1;
            }
            let start = chars[i].0;
            let end = chars.get(k).map_or(text.len(), |(idx, _)| *idx);
            pieces.push(&text[last..start]);
            pieces.push(&text[start..end]);
            last = end;
            i = k;
        } else {
            i += 1;
        }
    }

    pieces.push(&text[last..]);
    pieces
}
