//! Text chunking for incremental synthesis
//!
//! Long selections are split into speakable chunks that each fit a
//! character budget. Splitting prefers sentence boundaries, then clause
//! boundaries, then word boundaries; a single word longer than the
//! budget is emitted on its own rather than cut.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default character budget per chunk
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 400;

/// Terminal punctuation, an optional closing quote/bracket, then whitespace or end of text
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]+["'\)\]\u{201D}\u{2019}]?(\s+|$)"#).unwrap());

/// Clause separators: comma, semicolon, em/en dash, or a spaced hyphen
static CLAUSE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;\u{2014}\u{2013}]|\s-+\s").unwrap());

const SENTENCE_JOIN: &str = " ";
const CLAUSE_JOIN: &str = ", ";
const WORD_JOIN: &str = " ";

/// A bounded slice of the source text, in playback order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
}

/// Split `text` into indexed chunks of at most `max_chunk_size` characters
pub fn chunk(text: &str, max_chunk_size: usize) -> Vec<Chunk> {
    split_into_chunks(text, max_chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { text, index })
        .collect()
}

/// Split `text` into chunk strings of at most `max_chunk_size` characters.
///
/// Empty or whitespace-only input yields no chunks. A `max_chunk_size`
/// of zero is treated as one.
pub fn split_into_chunks(text: &str, max_chunk_size: usize) -> Vec<String> {
    let max = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if fits(&current, sentence, SENTENCE_JOIN, max) {
            append(&mut current, sentence, SENTENCE_JOIN);
            continue;
        }

        flush(&mut chunks, &mut current);

        if char_len(sentence) <= max {
            current.push_str(sentence);
        } else {
            // Whatever the clause tier leaves over keeps accumulating here
            current = pack_clauses(sentence, max, &mut chunks);
        }
    }

    flush(&mut chunks, &mut current);
    chunks
}

/// Split into trimmed, non-empty sentences. Text after the last
/// terminal punctuation is kept as a final sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_END.find_iter(text) {
        push_trimmed(&mut sentences, &text[start..boundary.end()]);
        start = boundary.end();
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Pack an oversized sentence by clauses, returning the trailing partial chunk
fn pack_clauses(sentence: &str, max: usize, chunks: &mut Vec<String>) -> String {
    let mut current = String::new();

    for clause in CLAUSE_BREAK.split(sentence) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }

        if fits(&current, clause, CLAUSE_JOIN, max) {
            append(&mut current, clause, CLAUSE_JOIN);
            continue;
        }

        flush(chunks, &mut current);

        if char_len(clause) <= max {
            current.push_str(clause);
        } else {
            current = pack_words(clause, max, chunks);
        }
    }

    current
}

/// Pack an oversized clause by words, returning the trailing partial chunk
fn pack_words(clause: &str, max: usize, chunks: &mut Vec<String>) -> String {
    let mut current = String::new();

    for word in clause.split_whitespace() {
        if fits(&current, word, WORD_JOIN, max) {
            append(&mut current, word, WORD_JOIN);
        } else {
            flush(chunks, &mut current);
            // May exceed the budget on its own; it is never cut
            current.push_str(word);
        }
    }

    current
}

fn fits(current: &str, piece: &str, separator: &str, max: usize) -> bool {
    if current.is_empty() {
        char_len(piece) <= max
    } else {
        char_len(current) + char_len(separator) + char_len(piece) <= max
    }
}

fn append(current: &mut String, piece: &str, separator: &str) {
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
