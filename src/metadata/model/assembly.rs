//! Assembly identity descriptors.

use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::metadata::model::{AssemblyFlags, LazyCell};

/// A four-part assembly version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Creates a version from its four parts
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl std::fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Derives the 8-byte public key token from a full public key.
///
/// The token is the last eight bytes of the SHA-1 digest of the key, in reversed
/// order, per the runtime's strong-name convention.
#[must_use]
pub fn public_key_token(public_key: &[u8]) -> [u8; 8] {
    let digest = Sha1::digest(public_key);

    let mut token = [0u8; 8];
    for (index, byte) in digest[digest.len() - 8..].iter().rev().enumerate() {
        token[index] = *byte;
    }
    token
}

/// Cheap-copy reference to an [`AssemblyDefinition`]
pub type AssemblyDefinitionRc = Arc<AssemblyDefinition>;

/// The assembly manifest of a module (the Assembly table row, resolved).
#[derive(Debug, Default)]
pub struct AssemblyDefinition {
    /// Simple name of the assembly
    pub name: LazyCell<String>,
    /// Culture string, `None` for the invariant culture
    pub culture: LazyCell<Option<String>>,
    /// Four-part version
    pub version: LazyCell<AssemblyVersion>,
    /// Assembly flags
    pub flags: LazyCell<AssemblyFlags>,
    /// Hash algorithm identifier (0x8004 for SHA-1)
    pub hash_algorithm: LazyCell<u32>,
    /// Full public key, `None` for unsigned assemblies
    pub public_key: LazyCell<Option<Vec<u8>>>,
}

impl AssemblyDefinition {
    /// Create an assembly manifest with the given simple name
    ///
    /// ## Arguments
    /// * 'name' - The simple name
    #[must_use]
    pub fn new(name: &str) -> AssemblyDefinitionRc {
        let assembly = AssemblyDefinition::default();
        assembly.name.set(name.to_string());
        Arc::new(assembly)
    }

    /// The simple name of the assembly
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The display name: `Name, Version=a.b.c.d`
    #[must_use]
    pub fn full_name(&self) -> String {
        let version = self.version.get_cloned().unwrap_or_default();
        format!("{}, Version={}", self.name(), version)
    }

    /// The public key token derived from the full public key, or `None` for
    /// unsigned assemblies
    #[must_use]
    pub fn public_key_token(&self) -> Option<[u8; 8]> {
        self.public_key
            .get_cloned()
            .flatten()
            .map(|key| public_key_token(&key))
    }
}

/// Cheap-copy reference to an [`AssemblyReference`]
pub type AssemblyReferenceRc = Arc<AssemblyReference>;

/// A reference to an external assembly (an AssemblyRef table row, resolved).
#[derive(Debug, Default)]
pub struct AssemblyReference {
    /// Simple name of the referenced assembly
    pub name: LazyCell<String>,
    /// Culture string, `None` for the invariant culture
    pub culture: LazyCell<Option<String>>,
    /// Four-part version
    pub version: LazyCell<AssemblyVersion>,
    /// Assembly flags; `PUBLIC_KEY` set means the identity blob holds the full key
    pub flags: LazyCell<AssemblyFlags>,
    /// Full public key or its 8-byte token, per the `PUBLIC_KEY` flag
    pub public_key_or_token: LazyCell<Option<Vec<u8>>>,
    /// Hash of the referenced assembly, if recorded
    pub hash_value: LazyCell<Option<Vec<u8>>>,
}

impl AssemblyReference {
    /// Create an assembly reference with the given simple name and version
    ///
    /// ## Arguments
    /// * 'name' - The simple name
    /// * 'version' - The referenced version
    #[must_use]
    pub fn new(name: &str, version: AssemblyVersion) -> AssemblyReferenceRc {
        let reference = AssemblyReference::default();
        reference.name.set(name.to_string());
        reference.version.set(version);
        Arc::new(reference)
    }

    /// The simple name of the referenced assembly
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The display name: `Name, Version=a.b.c.d`
    #[must_use]
    pub fn full_name(&self) -> String {
        let version = self.version.get_cloned().unwrap_or_default();
        format!("{}, Version={}", self.name(), version)
    }

    /// The 8-byte public key token of the referenced assembly.
    ///
    /// Derived from the stored full key when the `PUBLIC_KEY` flag is set, taken
    /// verbatim when the blob already holds a token, `None` when no identity blob
    /// is recorded.
    #[must_use]
    pub fn public_key_token(&self) -> Option<[u8; 8]> {
        let blob = self.public_key_or_token.get_cloned().flatten()?;
        let flags = self.flags.get_cloned().unwrap_or_default();

        if flags.contains(AssemblyFlags::PUBLIC_KEY) {
            return Some(public_key_token(&blob));
        }

        let mut token = [0u8; 8];
        if blob.len() != 8 {
            return None;
        }
        token.copy_from_slice(&blob);
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_derivation_matches_runtime_convention() {
        // The transform shape: last 8 digest bytes, reversed
        let key = [0u8; 16];
        let digest = Sha1::digest(key);
        let token = public_key_token(&key);

        for index in 0..8 {
            assert_eq!(token[index], digest[digest.len() - 1 - index]);
        }
    }

    #[test]
    fn definition_names() {
        let assembly = AssemblyDefinition::new("CoreLib");
        assembly.version.set(AssemblyVersion::new(4, 0, 2, 1));

        assert_eq!(assembly.name(), "CoreLib");
        assert_eq!(assembly.full_name(), "CoreLib, Version=4.0.2.1");
        assert_eq!(assembly.public_key_token(), None);
    }

    #[test]
    fn reference_token_paths() {
        let reference =
            AssemblyReference::new("System.Runtime", AssemblyVersion::new(8, 0, 0, 0));

        // No identity blob
        assert_eq!(reference.public_key_token(), None);

        // Stored token is returned verbatim
        reference
            .public_key_or_token
            .set(Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(
            reference.public_key_token(),
            Some([1, 2, 3, 4, 5, 6, 7, 8])
        );

        // Full key is hashed down to a token
        reference.flags.set(AssemblyFlags::PUBLIC_KEY);
        reference.public_key_or_token.set(Some(vec![0xAA; 160]));
        assert_eq!(
            reference.public_key_token(),
            Some(public_key_token(&[0xAA; 160]))
        );
    }
}
