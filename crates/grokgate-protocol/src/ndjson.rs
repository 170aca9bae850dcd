use bytes::{Buf, BytesMut};

/// Splits complete lines out of `buffer`, leaving any trailing partial line in place.
///
/// Carriage returns are stripped and blank lines are skipped.
pub fn drain_lines(buffer: &mut BytesMut) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(pos);
        buffer.advance(1);
        if let Some(text) = normalize_line(&line) {
            out.push(text);
        }
    }
    out
}

/// Returns the final unterminated line, if any, once the stream has ended.
pub fn drain_remainder(buffer: &mut BytesMut) -> Option<String> {
    if buffer.is_empty() {
        return None;
    }
    let rest = buffer.split();
    normalize_line(&rest)
}

fn normalize_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches('\r').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
