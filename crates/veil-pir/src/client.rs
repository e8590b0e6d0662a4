//! Client-side request shares and response combining
//!
//! A read of bucket `b` across `K` non-colluding servers sends each
//! server one share. Shares 1..K are uniformly random; share 0 is the
//! standard basis vector at `b` XORed with all the others. Any K-1
//! shares are uniform noise, but together they select exactly bucket
//! `b`, and XORing the per-server responses yields its contents.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::xor::{xor_all, xor_into};
use crate::{PirError, Result};

/// Build `num_servers` request-vector shares selecting `bucket`.
///
/// Each share is `ceil(num_buckets / 8)` bytes. Share 0 encodes the
/// secret; the rest are uniform.
pub fn generate_request_vectors(
    bucket: u64,
    num_servers: u64,
    num_buckets: u64,
) -> Result<Vec<Vec<u8>>> {
    if num_servers < 2 {
        return Err(PirError::TooFewServers(num_servers));
    }
    if bucket >= num_buckets {
        return Err(PirError::InvalidBucket {
            bucket,
            num_buckets,
        });
    }

    let num_bytes = num_buckets.div_ceil(8) as usize;
    let mut shares = Vec::with_capacity(num_servers as usize);

    let mut secret = vec![0u8; num_bytes];
    secret[(bucket / 8) as usize] |= 1 << (bucket % 8);

    for _ in 1..num_servers {
        let mut share = vec![0u8; num_bytes];
        OsRng.fill_bytes(&mut share);
        xor_into(&mut secret, &share);
        shares.push(share);
    }
    shares.insert(0, secret);
    Ok(shares)
}

/// XOR per-server responses back together.
///
/// All responses must be the same length; the result is the selected
/// bucket's contents (still carrying any response pads the servers
/// applied).
pub fn combine_responses(responses: &[Vec<u8>]) -> Result<Vec<u8>> {
    let first = responses.first().ok_or(PirError::NoResponses)?;
    if responses.iter().any(|r| r.len() != first.len()) {
        return Err(PirError::ResponseLength);
    }
    Ok(xor_all(first.len(), responses.iter().map(|r| r.as_slice())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_xor_to_basis_vector() {
        let num_buckets = 100u64;
        let bucket = 42u64;
        let shares = generate_request_vectors(bucket, 3, num_buckets).unwrap();
        assert_eq!(shares.len(), 3);
        assert_eq!(shares[0].len(), 13);

        let folded = combine_responses(&shares).unwrap();
        for b in 0..num_buckets {
            let set = folded[(b / 8) as usize] & (1 << (b % 8)) != 0;
            assert_eq!(set, b == bucket, "bit {b} wrong");
        }
    }

    #[test]
    fn test_too_few_servers() {
        assert!(matches!(
            generate_request_vectors(0, 1, 100),
            Err(PirError::TooFewServers(1))
        ));
    }

    #[test]
    fn test_bucket_out_of_range() {
        assert!(matches!(
            generate_request_vectors(100, 2, 100),
            Err(PirError::InvalidBucket { .. })
        ));
    }

    #[test]
    fn test_combine_rejects_unequal_lengths() {
        let responses = vec![vec![0u8; 4], vec![0u8; 5]];
        assert!(matches!(
            combine_responses(&responses),
            Err(PirError::ResponseLength)
        ));
    }

    #[test]
    fn test_combine_rejects_empty() {
        assert!(matches!(
            combine_responses(&[]),
            Err(PirError::NoResponses)
        ));
    }
}
