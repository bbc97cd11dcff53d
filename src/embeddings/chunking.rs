// Deterministic character-window chunking for embedding fan-out

/// Split `text` into windows of at most `size` characters.
///
/// Windows never split a UTF-8 code point. Empty text yields a single
/// empty chunk so every document produces at least one embedding call.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    if text.is_empty() {
        return vec![String::new()];
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|window| window.iter().collect())
        .collect()
}
