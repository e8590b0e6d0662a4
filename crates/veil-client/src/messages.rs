//! Message framing and fragmentation
//!
//! A message travels as `varint(len) || bytes`, split into item-sized
//! fragments published at consecutive sequence numbers. The subscriber
//! side reassembles by accumulating fragments until the declared length
//! is satisfied; whatever follows belongs to the next message.

/// Most fragments a single message may span.
pub const MSG_MAX_FRAGMENTS: usize = 64;

/// Bytes reserved for the stream-level length prefix when computing
/// how much payload fits under the fragment cap.
pub const LENGTH_PREFIX_MAX: usize = 5;

/// Append `value` to `buf` as a LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Read a varint from the front of `data`. Returns the value and the
/// number of bytes consumed, or `None` if the encoding is truncated.
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Frame a message and split it into fragments of at most `chunk_size`
/// bytes. Every fragment is non-empty; the last may be short.
pub fn split_message(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let mut framed = Vec::with_capacity(data.len() + 10);
    write_varint(&mut framed, data.len() as u64);
    framed.extend_from_slice(data);

    framed
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Streaming reassembly of framed messages from in-order fragments.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    /// Feed one fragment; returns any messages completed by it.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(fragment);

        let mut complete = Vec::new();
        while let Some((len, consumed)) = read_varint(&self.buf) {
            let total = consumed + len as usize;
            if self.buf.len() < total {
                break;
            }
            complete.push(self.buf[consumed..total].to_vec());
            self.buf.drain(..total);
        }
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(read_varint(&buf), Some((value, buf.len())));
        }
    }

    #[test]
    fn test_varint_truncated() {
        assert_eq!(read_varint(&[]), None);
        assert_eq!(read_varint(&[0x80]), None);
        assert_eq!(read_varint(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_single_fragment_roundtrip() {
        let parts = split_message(b"hello", 100);
        assert_eq!(parts.len(), 1);

        let mut reassembler = Reassembler::default();
        let messages = reassembler.push(&parts[0]);
        assert_eq!(messages, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_multi_fragment_roundtrip() {
        let data: Vec<u8> = (0..100u8).collect();
        let parts = split_message(&data, 16);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.len() <= 16));

        let mut reassembler = Reassembler::default();
        let mut messages = Vec::new();
        for part in &parts {
            messages.extend(reassembler.push(part));
        }
        assert_eq!(messages, vec![data]);
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut reassembler = Reassembler::default();

        let mut stream = Vec::new();
        for part in split_message(b"first", 8) {
            stream.extend_from_slice(&part);
        }
        for part in split_message(b"second message", 8) {
            stream.extend_from_slice(&part);
        }

        let mut messages = Vec::new();
        for chunk in stream.chunks(8) {
            messages.extend(reassembler.push(chunk));
        }
        assert_eq!(messages, vec![b"first".to_vec(), b"second message".to_vec()]);
    }

    #[test]
    fn test_fragment_count_at_the_cap() {
        let chunk = 75;

        // Reserving room for the length prefix keeps a maximal message
        // within the fragment cap.
        let max = chunk * MSG_MAX_FRAGMENTS - LENGTH_PREFIX_MAX;
        assert_eq!(split_message(&vec![0u8; max], chunk).len(), MSG_MAX_FRAGMENTS);

        // A full chunk-multiple of payload does not fit: the prefix
        // spills the framed stream into one more fragment.
        assert_eq!(
            split_message(&vec![0u8; chunk * MSG_MAX_FRAGMENTS], chunk).len(),
            MSG_MAX_FRAGMENTS + 1
        );
    }

    #[test]
    fn test_empty_message() {
        let parts = split_message(b"", 8);
        assert_eq!(parts.len(), 1);

        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.push(&parts[0]), vec![Vec::<u8>::new()]);
    }
}
