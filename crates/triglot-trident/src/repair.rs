//! The "enzyme" repair operation: an involutive XOR-chain over the payload,
//! used by channel 2 to fix up a packet that lands in the CHAOS region of
//! the discriminant before recomputing.
//!
//! The keystream is built by repeatedly applying `conj` to a polarity-keyed
//! seed, one step per byte position, independent of the payload content.
//! Because the same keystream byte lands at the same position on both the
//! forward and the repeat application, XORing against it twice always
//! cancels: `(b ^ k) ^ k == b`, for every `k` and every `b`. Chaining the
//! keystream against the *previous output byte* instead (rather than
//! deriving it purely from position) breaks this — the second application
//! sees a different "previous output" than the first did, so the conjugate
//! terms stop canceling after the first byte.
use triglot_duplex::{conj, Polarity};

fn seed(polarity: Polarity) -> u8 {
    match polarity {
        Polarity::A => 0x00,
        Polarity::B => 0xFF,
    }
}

pub fn repair(payload: &[u8], polarity: Polarity) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut key = seed(polarity);
    for &b in payload {
        out.push(b ^ key);
        key = conj(key);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_is_involutive() {
        let payload = b"the quick brown fox jumps".to_vec();
        let once = repair(&payload, Polarity::A);
        let twice = repair(&once, Polarity::A);
        assert_eq!(twice, payload);
    }

    #[test]
    fn repair_is_involutive_for_polarity_b() {
        let payload = b"another payload entirely".to_vec();
        let once = repair(&payload, Polarity::B);
        let twice = repair(&once, Polarity::B);
        assert_eq!(twice, payload);
    }

    #[test]
    fn repair_is_involutive_for_longer_payloads() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(513).collect();
        let once = repair(&payload, Polarity::A);
        let twice = repair(&once, Polarity::A);
        assert_eq!(twice, payload);
    }

    #[test]
    fn repair_changes_the_payload() {
        let payload = vec![0u8; 16];
        let repaired = repair(&payload, Polarity::A);
        assert_ne!(repaired, payload);
    }

    #[test]
    fn repair_is_empty_safe() {
        assert_eq!(repair(&[], Polarity::A), Vec::<u8>::new());
    }
}
