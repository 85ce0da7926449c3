//! Message fragmentation for outgoing WebSocket messages (RFC 6455).

use crate::protocol::{Frame, OpCode};

/// How fragment boundaries are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Bytes,
    Chars,
}

/// Iterator that produces frames from a message payload.
///
/// Binary payloads are split every `fragment_size` bytes. Text payloads are
/// split every `fragment_size` characters, so a character is never cut in
/// two. The first frame carries the message opcode, the rest use
/// `OpCode::Continuation`, and only the last has FIN set.
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    unit: Unit,
    fragment_size: usize,
    offset: usize,
    is_first: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Fragment a binary payload by bytes.
    #[inline]
    #[must_use]
    pub fn binary(payload: &'a [u8], fragment_size: usize) -> Self {
        Self::new(payload, OpCode::Binary, Unit::Bytes, fragment_size)
    }

    /// Fragment a text payload by characters.
    #[inline]
    #[must_use]
    pub fn text(payload: &'a str, fragment_size: usize) -> Self {
        Self::new(payload.as_bytes(), OpCode::Text, Unit::Chars, fragment_size)
    }

    fn new(payload: &'a [u8], opcode: OpCode, unit: Unit, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            unit,
            // At least one unit per fragment
            fragment_size: fragment_size.max(1),
            offset: 0,
            is_first: true,
        }
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }

    fn chunk_len(&self) -> usize {
        let rest = &self.payload[self.offset..];
        match self.unit {
            Unit::Bytes => rest.len().min(self.fragment_size),
            // Offsets always sit on character boundaries of a `&str`, so
            // counting non-continuation bytes counts characters.
            Unit::Chars => {
                let mut chars = 0;
                rest.iter()
                    .position(|byte| {
                        if byte & 0xC0 == 0x80 {
                            return false;
                        }
                        chars += 1;
                        chars > self.fragment_size
                    })
                    .unwrap_or(rest.len())
            }
        }
    }
}

impl Iterator for MessageFragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() {
            if self.is_first {
                self.is_first = false;
                return Some(Frame::new(true, self.opcode, Vec::new()));
            }
            return None;
        }

        let chunk_len = self.chunk_len();
        let chunk = self.payload[self.offset..self.offset + chunk_len].to_vec();
        self.offset += chunk_len;
        let is_final = self.offset >= self.payload.len();

        let opcode = if self.is_first {
            self.is_first = false;
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(is_final, opcode, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fragmentation_needed() {
        let frames: Vec<_> = MessageFragmenter::text("Hello", 1024).collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].application_data(), b"Hello");
    }

    #[test]
    fn test_exact_fragmentation() {
        let payload = vec![0xAB; 30];
        let frames: Vec<_> = MessageFragmenter::binary(&payload, 10).collect();
        assert_eq!(frames.len(), 3);

        assert!(!frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(!frames[1].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[2].fin);
        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert!(frames.iter().all(|f| f.application_data().len() == 10));
    }

    #[test]
    fn test_uneven_fragmentation() {
        let payload = vec![0xCD; 25];
        let frames: Vec<_> = MessageFragmenter::binary(&payload, 10).collect();
        let sizes: Vec<_> = frames.iter().map(|f| f.application_data().len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(frames[2].fin);
    }

    #[test]
    fn test_empty_payload() {
        let frames: Vec<_> = MessageFragmenter::binary(&[], 8).collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(frames[0].application_data().is_empty());
    }

    #[test]
    fn test_text_split_by_characters() {
        // Three 3-byte characters and one ASCII character.
        let text = "\u{20AC}\u{20AC}\u{20AC}a";
        let frames: Vec<_> = MessageFragmenter::text(text, 2).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].application_data(), "\u{20AC}\u{20AC}".as_bytes());
        assert_eq!(frames[1].application_data(), "\u{20AC}a".as_bytes());
        for frame in &frames {
            assert!(std::str::from_utf8(frame.application_data()).is_ok());
        }
    }

    #[test]
    fn test_hello_world_three_fragments() {
        let frames: Vec<_> = MessageFragmenter::text("Hello, World!", 5).collect();
        let parts: Vec<_> = frames
            .iter()
            .map(|f| std::str::from_utf8(f.application_data()).unwrap())
            .collect();
        assert_eq!(parts, vec!["Hello", ", Wor", "ld!"]);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(frames[2].fin);
    }

    #[test]
    fn test_large_text_one_char_per_fragment() {
        let text = "a\u{e9}\u{20AC}\u{1F600}".repeat(50_000);
        let mut frag = MessageFragmenter::text(&text, 1);
        let mut rebuilt = Vec::with_capacity(text.len());
        let mut count = 0;
        for frame in frag.by_ref() {
            let data = frame.application_data();
            assert_eq!(std::str::from_utf8(data).unwrap().chars().count(), 1);
            rebuilt.extend_from_slice(data);
            count += 1;
        }
        assert_eq!(count, 200_000);
        assert_eq!(frag.remaining(), 0);
        assert_eq!(rebuilt, text.as_bytes());
    }

    #[test]
    fn test_multibyte_chunk_boundaries() {
        let text = "\u{1F600}b\u{e9}\u{20AC}";
        let parts: Vec<Vec<u8>> = MessageFragmenter::text(text, 3)
            .map(|f| f.application_data().to_vec())
            .collect();
        assert_eq!(
            parts,
            vec![
                "\u{1F600}b\u{e9}".as_bytes().to_vec(),
                "\u{20AC}".as_bytes().to_vec()
            ]
        );
    }

    #[test]
    fn test_zero_fragment_size_clamped() {
        let frames: Vec<_> = MessageFragmenter::binary(&[1, 2], 0).collect();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_remaining_bytes() {
        let payload = vec![0xAB; 30];
        let mut frag = MessageFragmenter::binary(&payload, 10);

        assert_eq!(frag.remaining(), 30);
        frag.next();
        assert_eq!(frag.remaining(), 20);
        frag.next();
        frag.next();
        assert_eq!(frag.remaining(), 0);
        assert!(frag.next().is_none());
    }
}
