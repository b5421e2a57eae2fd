//! Splits instructor text into sentence-aligned pieces for synthesis.

/// Default upper bound, in characters, for a single synthesis chunk.
pub const DEFAULT_CHUNK_CHARS: usize = 120;

/// Sentence-terminal punctuation a chunk boundary may follow.
const SENTENCE_TERMINALS: [char; 3] = ['。', '！', '？'];

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// Text that already fits is returned as a single chunk, except empty text,
/// which yields no chunks so that nothing is sent for it. Longer text is cut
/// after sentence-terminal punctuation and consecutive sentences are packed
/// greedily. A sentence longer than `max_chars` is kept whole rather than
/// being cut mid-sentence. Concatenating the result always reproduces the
/// input exactly; whitespace-only fragments ride along with their neighbour
/// instead of becoming chunks of their own.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in text.split_inclusive(|c| SENTENCE_TERMINALS.contains(&c)) {
        let len = sentence.chars().count();
        let blank = sentence.trim().is_empty() || current.trim().is_empty();
        if blank || current_len + len <= max_chars {
            current.push_str(sentence);
            current_len += len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(sentence);
            current_len = len;
        }
    }

    if !current.is_empty() {
        match chunks.last_mut() {
            Some(last) if current.trim().is_empty() => last.push_str(&current),
            _ => chunks.push(current),
        }
    }
    chunks
}
