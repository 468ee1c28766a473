use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const CORRELATION_ID_LEN: usize = 10;
const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Per-invocation token tying together log lines, the archive file and the incident report.
///
/// Uniqueness is not enforced; two concurrent invocations drawing the same id is
/// an accepted low-probability risk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Draw a fresh id from a generator seeded with the current time and process id.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let seed = nanos ^ (u64::from(std::process::id()) << 32);
        Self::from_rng(&mut StdRng::seed_from_u64(seed))
    }

    pub fn from_rng<R: Rng>(rng: &mut R) -> Self {
        let id = (0..CORRELATION_ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        for _ in 0..100 {
            let id = CorrelationId::generate();
            assert_eq!(id.as_str().len(), CORRELATION_ID_LEN);
            assert!(id
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_same_seed_same_id() {
        let a = CorrelationId::from_rng(&mut StdRng::seed_from_u64(42));
        let b = CorrelationId::from_rng(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_whole_alphabet_reachable() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.extend(CorrelationId::from_rng(&mut rng).as_str().chars());
        }
        assert_eq!(seen.len(), ALPHABET.len());
    }
}
