/// Splits `remainder + chunk` into complete lines.
///
/// `\r\n` is folded to `\n` after concatenation, so a terminator split across
/// two chunks is still recognised. Text after the last `\n` is handed back as
/// the new remainder.
pub fn reassemble(chunk: &str, remainder: &str) -> (Vec<String>, String) {
    let mut combined = String::with_capacity(remainder.len() + chunk.len());
    combined.push_str(remainder);
    combined.push_str(chunk);
    let combined = normalize_terminators(&combined);

    let mut lines: Vec<String> = combined.split('\n').map(str::to_string).collect();
    // split always yields at least one segment; the last one is either the
    // unterminated tail or the empty string after a final '\n'.
    let rest = lines.pop().unwrap_or_default();
    (lines, rest)
}

pub fn normalize_terminators(text: &str) -> String {
    text.replace("\r\n", "\n")
}
