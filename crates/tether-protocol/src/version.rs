//! Protocol versioning for Tether.
//!
//! A version travels on the wire as a single byte: the major number in the
//! high nibble, the minor number in the low nibble.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version - a service rejects logins with a different major.
    pub major: u8,
    /// Minor version - additive frame fields only.
    pub minor: u8,
}

impl Version {
    /// Create a new version. Both parts are truncated to four bits.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self {
            major: major & 0x0F,
            minor: minor & 0x0F,
        }
    }

    /// Unpack a version from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::new(byte >> 4, byte & 0x0F)
    }

    /// Pack this version into its wire byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        (self.major << 4) | self.minor
    }

    /// Whether a peer speaking `other` can talk to us.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
