//! Delimiter framing for the gateway socket.
//!
//! Each message travels as `<` + text + `>` with no length prefix. Receivers
//! recover message boundaries by scanning for the delimiters.

pub const FRAME_START: u8 = b'<';
pub const FRAME_END: u8 = b'>';

/// Wrap a message in the wire delimiters.
pub fn frame(message: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(message.len() + 2);
    bytes.push(FRAME_START);
    bytes.extend_from_slice(message.as_bytes());
    bytes.push(FRAME_END);
    bytes
}

/// Extract every complete `<...>` message from `buf`.
///
/// Returns the message bodies and the number of bytes consumed; bytes after
/// the last complete message (a partial frame) are left for the next call.
/// Anything outside delimiters is discarded.
pub fn split_frames(buf: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut messages = Vec::new();
    let mut consumed = 0;

    while let Some(start) = buf[consumed..].iter().position(|b| *b == FRAME_START) {
        let body_start = consumed + start + 1;
        match buf[body_start..].iter().position(|b| *b == FRAME_END) {
            Some(len) => {
                messages.push(&buf[body_start..body_start + len]);
                consumed = body_start + len + 1;
            }
            None => return (messages, consumed + start),
        }
    }

    (messages, buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame() {
        assert_eq!(frame("{\"value\":1}"), b"<{\"value\":1}>");
        assert_eq!(frame(""), b"<>");
    }

    #[test]
    fn test_split_frames_complete() {
        let (messages, consumed) = split_frames(b"<a><bc>");
        assert_eq!(messages, vec![&b"a"[..], &b"bc"[..]]);
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_split_frames_keeps_partial_tail() {
        let buf = b"<a><b";
        let (messages, consumed) = split_frames(buf);
        assert_eq!(messages, vec![&b"a"[..]]);
        assert_eq!(&buf[consumed..], b"<b");
    }

    #[test]
    fn test_split_frames_skips_noise() {
        let (messages, consumed) = split_frames(b"junk<a>more");
        assert_eq!(messages, vec![&b"a"[..]]);
        assert_eq!(consumed, 11);
    }
}
