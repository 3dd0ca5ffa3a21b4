//! Stable job and artifact identifiers.
//!
//! A fingerprint is a UUIDv5 over the two identifying strings joined with a
//! `|` separator, in the RFC 4122 URL namespace. The same inputs always
//! produce the same id, which is what makes enqueue deduplication work.

use uuid::Uuid;

const SEP: &str = "|";

/// Join the two identifying strings into the hashed key.
pub fn key(a: &str, b: &str) -> String {
    format!("{a}{SEP}{b}")
}

/// Derive the deterministic UUIDv5 for a pair of identifying strings.
///
/// Inputs containing the separator are concatenated verbatim; collisions
/// from that are not a practical concern.
pub fn uuid_v5(a: &str, b: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key(a, b).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_with_separator() {
        assert_eq!(key("foo", "bar"), "foo|bar");
        assert_eq!(key("", "value"), "|value");
        assert_eq!(key("value", ""), "value|");
        assert_eq!(key("foo|bar", "baz"), "foo|bar|baz");
    }

    #[test]
    fn uuid_v5_is_deterministic() {
        let a = uuid_v5("https://example.com/v", "mp4");
        let b = uuid_v5("https://example.com/v", "mp4");
        assert_eq!(a, b);
    }

    #[test]
    fn uuid_v5_differs_per_input() {
        assert_ne!(uuid_v5("a", "b"), uuid_v5("a", "c"));
        assert_ne!(uuid_v5("a", "b"), uuid_v5("b", "a"));
    }

    #[test]
    fn uuid_v5_matches_manual_derivation() {
        // UUIDv5 in the URL namespace over the joined key.
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"foo|bar");
        assert_eq!(uuid_v5("foo", "bar"), expected);
    }

    #[test]
    fn uuid_v5_version_and_variant() {
        let id = uuid_v5("foo", "bar");
        assert_eq!(id.get_version_num(), 5);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn deterministic_for_any_input(a in ".*", b in ".*") {
                prop_assert_eq!(uuid_v5(&a, &b), uuid_v5(&a, &b));
            }

            #[test]
            fn always_version_5(a in ".*", b in ".*") {
                prop_assert_eq!(uuid_v5(&a, &b).get_version_num(), 5);
            }

            #[test]
            fn swapping_inputs_changes_the_id(a in "[a-z]{1,16}", b in "[0-9]{1,16}") {
                // Disjoint alphabets, so a != b always holds.
                prop_assert_ne!(uuid_v5(&a, &b), uuid_v5(&b, &a));
            }
        }
    }
}
