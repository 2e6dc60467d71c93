use rand::RngCore;

/// Generate a fresh lock token: 16 random bytes, hex-encoded.
///
/// A token is bound to exactly one acquisition attempt and is never reused;
/// the compare-and-delete release depends on tokens being unique so that a
/// holder who lost its lock to TTL expiry cannot delete a successor's record.
pub fn fresh_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let token = fresh_token();
            assert_eq!(token.len(), 32);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(token));
        }
    }
}
