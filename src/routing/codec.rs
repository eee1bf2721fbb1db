//! Path prefix ⇄ registration name mapping and port derivation.
//!
//! The control plane does not accept `/` in backend names, so a path prefix is
//! flattened by substituting every `/` with a configured separator. The mapping
//! is only invertible when the prefix never contains the separator and the
//! separator never contains `/`. Callers guarantee that; nothing here checks it.

/// Path delimiter substituted by the codec.
pub const PATH_DELIMITER: &str = "/";

/// Ports at or below this value are never handed out.
pub const PORT_FLOOR: u32 = 10_000;

/// Flatten a path prefix into a control-plane identifier.
pub fn encode(separator: &str, prefix: &str) -> String {
    prefix.replace(PATH_DELIMITER, separator)
}

/// Recover the path prefix from a control-plane identifier.
pub fn decode(separator: &str, identifier: &str) -> String {
    identifier.replace(separator, PATH_DELIMITER)
}

/// Bidirectional codec bound to one separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCodec {
    separator: String,
}

impl NameCodec {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn identifier_for(&self, prefix: &str) -> String {
        encode(&self.separator, prefix)
    }

    pub fn prefix_for(&self, identifier: &str) -> String {
        decode(&self.separator, identifier)
    }
}

/// Adler-32 over `data`.
fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65_521;
    // Largest block that cannot overflow the running sums before reduction.
    const NMAX: usize = 5_552;

    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for block in data.chunks(NMAX) {
        for &byte in block {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}

/// Deterministic listen port for an identifier, in `(PORT_FLOOR, 65535]`.
///
/// The checksum is folded into 16 bits by dividing by 65536, then doubled until
/// it clears the floor. A zero fold would never clear it, so it starts from 1.
/// Collisions are not resolved here; the control plane rejects duplicate ports.
pub fn derived_port(identifier: &str) -> u16 {
    let mut port = adler32(identifier.as_bytes()) / 65_536;
    if port == 0 {
        port = 1;
    }
    while port <= PORT_FLOOR {
        port *= 2;
    }
    // Doubling anything <= PORT_FLOOR lands below 2 * PORT_FLOOR + 1.
    port as u16
}
