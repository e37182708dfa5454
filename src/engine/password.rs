use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::secret::PasswordPolicy;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{}<>?";

/// Generate a password satisfying `policy`. Every enabled character class
/// appears at least once.
pub fn generate(policy: &PasswordPolicy) -> String {
    let mut rng = rand::rngs::OsRng;

    let mut classes: Vec<&[u8]> = vec![LOWER];
    if policy.include_uppercase {
        classes.push(UPPER);
    }
    if policy.include_digits {
        classes.push(DIGITS);
    }
    if policy.include_symbols {
        classes.push(SYMBOLS);
    }
    let alphabet: Vec<u8> = classes.iter().flat_map(|c| c.iter().copied()).collect();

    let length = usize::from(policy.length).max(classes.len());
    let mut out: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while out.len() < length {
        out.push(alphabet[rng.gen_range(0..alphabet.len())]);
    }
    out.shuffle(&mut rng);

    out.into_iter().map(char::from).collect()
}
