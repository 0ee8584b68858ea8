//! xxHash3 digests for component ids.

use xxhash_rust::xxh3::xxh3_64;

/// 64-bit xxHash3 of a string.
#[inline]
pub fn hash_str(data: &str) -> u64 {
    xxh3_64(data.as_bytes())
}

/// 8 character hex digest, the length Vue uses for component ids
/// (`data-v-xxxxxxxx`, `__hmrId`).
///
/// Taken from the high half of the hash so that it is a prefix of the
/// zero-padded 16 character form.
#[inline]
pub fn short_hash(content: &str) -> String {
    format!("{:08x}", hash_str(content) >> 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_stable() {
        let id = short_hash("src/components/Counter.vue");
        assert_eq!(id, short_hash("src/components/Counter.vue"));
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_hash_prefix() {
        let full = format!("{:016x}", hash_str("src/App.vue"));
        assert!(full.starts_with(&short_hash("src/App.vue")));
        assert_ne!(short_hash("src/A.vue"), short_hash("src/B.vue"));
    }
}
