use std::hash::{Hash, Hasher};

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

/// Stable hash over the inputs that determine whether two parse requests
/// are interchangeable for compilation-cache purposes: tokenized source,
/// protocol version, output format, expect-one flag, implicit limit,
/// inline-typeids/typenames/objectids, allowed capabilities, module, and
/// namespace. Two fingerprints equal implies the compiled result is
/// interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn compute(input: &FingerprintInput<'_>) -> Self {
        let mut hasher = FnvHasher::default();
        input.tokenized_source.hash(&mut hasher);
        input.protocol_major.hash(&mut hasher);
        input.protocol_minor.hash(&mut hasher);
        input.output_format.hash(&mut hasher);
        input.expect_one.hash(&mut hasher);
        input.implicit_limit.hash(&mut hasher);
        input.inline_typeids.hash(&mut hasher);
        input.inline_typenames.hash(&mut hasher);
        input.inline_objectids.hash(&mut hasher);
        input.allow_capabilities.hash(&mut hasher);
        input.module.hash(&mut hasher);
        input.namespace.hash(&mut hasher);
        input.read_only.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The normalized fields a `Fingerprint` is computed from. Borrowed rather
/// than owned: callers assemble it from request state that already lives
/// on the connection view.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintInput<'a> {
    pub tokenized_source: &'a str,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub output_format: u8,
    pub expect_one: bool,
    pub implicit_limit: u64,
    pub inline_typeids: bool,
    pub inline_typenames: bool,
    pub inline_objectids: bool,
    pub allow_capabilities: u64,
    pub module: Option<&'a str>,
    pub namespace: Option<&'a str>,
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(source: &str) -> FingerprintInput<'_> {
        FingerprintInput {
            tokenized_source: source,
            protocol_major: 1,
            protocol_minor: 0,
            output_format: 0,
            expect_one: false,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            allow_capabilities: u64::MAX,
            module: None,
            namespace: None,
            read_only: false,
        }
    }

    #[test]
    fn equal_inputs_produce_equal_fingerprints() {
        let a = Fingerprint::compute(&base_input("select 1"));
        let b = Fingerprint::compute(&base_input("select 1"));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_source_changes_fingerprint() {
        let a = Fingerprint::compute(&base_input("select 1"));
        let b = Fingerprint::compute(&base_input("select 2"));
        assert_ne!(a, b);
    }

    #[test]
    fn differing_protocol_version_changes_fingerprint() {
        let mut input = base_input("select 1");
        let a = Fingerprint::compute(&input);
        input.protocol_minor = 14;
        let b = Fingerprint::compute(&input);
        assert_ne!(a, b);
    }
}
