/*!
Stable content hashing shared by every layer of the build engine.

A `Fingerprint` is the hex-encoded SHA-256 digest of a sequence of byte
strings fed into a `FingerprintBuilder` in a caller-chosen, but always
explicit and sorted, order. Nothing in this crate infers an order on the
caller's behalf — canonical ordering (by package fingerprint, by
instance-group name, ...) is the responsibility of the component that
knows what "canonical" means for its inputs. This keeps the core
property simple to reason about: the same ordered sequence of inputs
always yields the same `Fingerprint`, and a different sequence almost
certainly does not.
*/

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A stable hash identifying a package, job, release, or computed image tag.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the fingerprint truncated to `len` hex characters, for use in
    /// human-facing tags where the full 64 characters are unwieldy.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

#[derive(Debug, snafu::Snafu)]
pub struct ParseFingerprintError;

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(ParseFingerprintError)
        }
    }
}

/// Incrementally builds a `Fingerprint` out of an explicitly ordered sequence
/// of byte strings. Each call to `update` appends a NUL separator before the
/// next field so that `update("ab").update("c")` and `update("a").update("bc")`
/// never collide.
pub struct FingerprintBuilder(Sha256);

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.0.update(bytes.as_ref());
        self.0.update(b"\0");
        self
    }

    /// Folds an already-ordered collection of fields in one call. Callers are
    /// responsible for sorting `items` beforehand; this never sorts on its own.
    pub fn update_all<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        for item in items {
            self.update(item);
        }
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.0.finalize()))
    }
}

/// Convenience for the common case of hashing one ordered list of fields.
pub fn fingerprint_of<I, S>(items: I) -> Fingerprint
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut b = FingerprintBuilder::new();
    b.update_all(items);
    b.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_ordered_inputs_produce_same_fingerprint() {
        let a = fingerprint_of(["one", "two", "three"]);
        let b = fingerprint_of(["one", "two", "three"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_order_produces_different_fingerprint() {
        let a = fingerprint_of(["one", "two"]);
        let b = fingerprint_of(["two", "one"]);
        assert_ne!(a, b);
    }

    #[test]
    fn nul_separator_prevents_concatenation_collision() {
        let a = fingerprint_of(["ab", "c"]);
        let b = fingerprint_of(["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn short_truncates_without_panicking_on_short_requests() {
        let fp = fingerprint_of(["anything"]);
        assert_eq!(fp.short(8).len(), 8);
        assert_eq!(fp.short(1000).len(), 64);
    }

    #[test]
    fn parses_valid_hex_digests_only() {
        let fp = fingerprint_of(["anything"]);
        let round_tripped: Fingerprint = fp.as_str().parse().unwrap();
        assert_eq!(fp, round_tripped);
        assert!("not-hex".parse::<Fingerprint>().is_err());
        assert!("abcd".parse::<Fingerprint>().is_err());
    }
}
