/// A slice of a source document, sized for embedding.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// Chunk text.
    pub text: String,
    /// Estimated token count of `text`.
    pub token_count: usize,
    /// Identifier of the document this chunk belongs to.
    pub document_id: String,
    /// Byte offset of the chunk within the original document, best effort.
    pub start_position: usize,
}

/// Target size of a chunk, in estimated tokens.
const TARGET_TOKENS: usize = 500;
/// Tail of the previous chunk carried into the next one, in characters.
const OVERLAP_CHARS: usize = 200;

/// Approximate token count: whitespace-separated words plus ASCII
/// punctuation marks. Estimates are additive over concatenation, so the
/// estimate of a message sequence only ever shrinks when an entry is
/// removed.
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}

/// Split a document into chunks of roughly [`TARGET_TOKENS`] tokens.
///
/// Paragraphs are packed greedily; a paragraph larger than the target is
/// broken at sentence boundaries. Consecutive chunks share a short overlap
/// so retrieval does not lose context at the seams.
pub fn split_into_chunks(text: &str, document_id: &str) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if estimate_token_count(paragraph) > TARGET_TOKENS {
            // Flush whatever was accumulated, then pack the long paragraph
            // sentence by sentence.
            flush(&mut chunks, &mut current, text, document_id);
            for sentence in split_sentences(paragraph) {
                push_piece(&mut chunks, &mut current, &sentence, " ", text, document_id);
            }
            flush(&mut chunks, &mut current, text, document_id);
        } else {
            push_piece(&mut chunks, &mut current, paragraph, "\n\n", text, document_id);
        }
    }

    flush(&mut chunks, &mut current, text, document_id);
    chunks
}

/// Naive sentence split on terminal punctuation, keeping the terminator.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut buf = String::new();
    for c in paragraph.chars() {
        buf.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = buf.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            buf.clear();
        }
    }
    let rest = buf.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Append `piece` to the accumulator, flushing a chunk first if the piece
/// would push it past the target size.
fn push_piece(
    chunks: &mut Vec<TextChunk>,
    current: &mut String,
    piece: &str,
    separator: &str,
    source: &str,
    document_id: &str,
) {
    let accumulated = estimate_token_count(current);
    if accumulated > 0 && accumulated + estimate_token_count(piece) > TARGET_TOKENS {
        let tail = overlap_tail(current);
        flush(chunks, current, source, document_id);
        current.push_str(&tail);
    }
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

/// Emit the accumulator as a chunk, if non-empty.
fn flush(chunks: &mut Vec<TextChunk>, current: &mut String, source: &str, document_id: &str) {
    let text = current.trim();
    if text.is_empty() {
        current.clear();
        return;
    }
    let start_position = source.find(text).unwrap_or(0);
    chunks.push(TextChunk {
        text: text.to_string(),
        token_count: estimate_token_count(text),
        document_id: document_id.to_string(),
        start_position,
    });
    current.clear();
}

/// The trailing characters of a chunk, on a char boundary, reused as the
/// start of the next chunk.
fn overlap_tail(chunk: &str) -> String {
    let char_count = chunk.chars().count();
    let skip = char_count.saturating_sub(OVERLAP_CHARS);
    chunk
        .chars()
        .skip(skip)
        .collect::<String>()
        .trim_start()
        .to_string()
}
