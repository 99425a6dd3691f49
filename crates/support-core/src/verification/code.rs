//! Verification code generation and comparison.

use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;

/// Generates a numeric code of `length` digits from the OS RNG.
///
/// Leading zeros are allowed, so every code of the given length is equally likely.
pub fn generate_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Compares a submitted code with the stored one in constant time.
///
/// Surrounding whitespace and inner spaces in the submission are ignored.
pub fn codes_match(submitted: &str, expected: &str) -> bool {
    let submitted: String = submitted.chars().filter(|c| !c.is_whitespace()).collect();
    let a = submitted.as_bytes();
    let b = expected.as_bytes();
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
