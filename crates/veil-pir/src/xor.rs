//! Word-vectorised XOR accumulation
//!
//! The hot loop of the kernel and of response combining. Operates on
//! 8-byte words with a bytewise tail so callers can pass any length.

/// XOR `src` into `dst` in place. The slices must be the same length.
#[inline]
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "xor_into length mismatch");

    let mut dst_words = dst.chunks_exact_mut(8);
    let mut src_words = src.chunks_exact(8);
    for (d, s) in dst_words.by_ref().zip(src_words.by_ref()) {
        let word = u64::from_le_bytes(d[..8].try_into().unwrap())
            ^ u64::from_le_bytes(s.try_into().unwrap());
        d.copy_from_slice(&word.to_le_bytes());
    }

    for (d, s) in dst_words
        .into_remainder()
        .iter_mut()
        .zip(src_words.remainder())
    {
        *d ^= s;
    }
}

/// XOR a list of equal-length slices together into a fresh buffer.
pub fn xor_all<'a, I>(len: usize, slices: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = vec![0u8; len];
    for slice in slices {
        xor_into(&mut out, slice);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_self_is_zero() {
        let src = vec![0x42u8; 37];
        let mut dst = src.clone();
        xor_into(&mut dst, &src);
        assert_eq!(dst, vec![0u8; 37]);
    }

    #[test]
    fn test_xor_unaligned_tail() {
        let mut dst = vec![0xffu8; 11];
        let src: Vec<u8> = (0..11).collect();
        xor_into(&mut dst, &src);
        for (i, b) in dst.iter().enumerate() {
            assert_eq!(*b, 0xff ^ i as u8);
        }
    }

    #[test]
    fn test_xor_all() {
        let a = [0x01u8, 0x02, 0x04];
        let b = [0x10u8, 0x20, 0x40];
        let c = [0x01u8, 0x00, 0x04];
        let out = xor_all(3, [a.as_slice(), b.as_slice(), c.as_slice()]);
        assert_eq!(out, vec![0x10, 0x22, 0x40]);
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_xor_length_mismatch_panics() {
        let mut dst = vec![0u8; 4];
        xor_into(&mut dst, &[0u8; 5]);
    }
}
