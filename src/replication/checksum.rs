//! Cheap equality probe over an ordered sequence of content ids.
//!
//! Not a hash in any security sense: peers only use it to tell whether they
//! are looking at the same candidate vector without shipping the vector back.

use super::types::{Checksum, ContentRef, Entry};

/// Upper bound (exclusive) of every checksum value
pub const CHECKSUM_MODULUS: u32 = 100_000;

const SEPARATOR: &str = "|";

/// Fold the ids, joined by `|`, one UTF-16 code unit at a time.
pub fn checksum<I, S>(content_ids: I) -> Checksum
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut acc: u32 = 0;
    for (i, id) in content_ids.into_iter().enumerate() {
        if i > 0 {
            acc = fold(acc, SEPARATOR);
        }
        acc = fold(acc, id.as_ref());
    }
    acc
}

pub fn checksum_refs(refs: &[ContentRef]) -> Checksum {
    checksum(refs.iter().map(|r| r.content_id.as_str()))
}

pub fn checksum_entries(entries: &[Entry]) -> Checksum {
    checksum(entries.iter().map(|e| e.content_id.as_str()))
}

fn fold(acc: u32, s: &str) -> u32 {
    s.encode_utf16()
        .fold(acc, |a, unit| (a + u32::from(unit)) % CHECKSUM_MODULUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(checksum(Vec::<String>::new()), 0);
    }

    #[test]
    fn test_single_id_sums_code_units() {
        // 'a' = 97, 'b' = 98
        assert_eq!(checksum(["ab"]), 195);
    }

    #[test]
    fn test_separator_counts() {
        // '|' = 124
        assert_eq!(checksum(["a", "b"]), 97 + 124 + 98);
    }

    #[test]
    fn test_deterministic_across_inputs() {
        let ids = vec!["QmYwAPJzv5CZsnA".to_string(), "QmT78zSuBmuS4z9".to_string()];
        let refs = vec![ContentRef::new(1, ids[0].clone()), ContentRef::new(2, ids[1].clone())];
        assert_eq!(checksum(&ids), checksum_refs(&refs));
    }

    #[test]
    fn test_stays_below_modulus() {
        let long = "z".repeat(10_000);
        assert!(checksum([long.as_str(), long.as_str()]) < CHECKSUM_MODULUS);
    }

    #[test]
    fn test_non_ascii_uses_utf16_units() {
        // U+1F600 is the surrogate pair D83D DE00
        assert_eq!(checksum(["\u{1F600}"]), (0xD83D + 0xDE00) % CHECKSUM_MODULUS);
    }
}
