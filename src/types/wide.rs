//! 256-bit integers, stored as raw little-endian bytes.

use std::fmt;

/// Signed 256-bit integer (two's complement, little-endian).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct I256(pub [u8; 32]);

/// Unsigned 256-bit integer (little-endian).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct U256(pub [u8; 32]);

impl I256 {
    pub const ZERO: I256 = I256([0; 32]);

    /// Narrow to `i128` when the upper half is a pure sign extension.
    pub fn to_i128(&self) -> Option<i128> {
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[..16]);
        let value = i128::from_le_bytes(low);
        let fill = if value < 0 { 0xff } else { 0x00 };
        self.0[16..].iter().all(|b| *b == fill).then_some(value)
    }

    pub fn is_negative(&self) -> bool {
        self.0[31] & 0x80 != 0
    }
}

impl From<i128> for I256 {
    fn from(v: i128) -> Self {
        let mut bytes = if v < 0 { [0xff; 32] } else { [0; 32] };
        bytes[..16].copy_from_slice(&v.to_le_bytes());
        I256(bytes)
    }
}

impl U256 {
    pub const ZERO: U256 = U256([0; 32]);

    pub fn to_u128(&self) -> Option<u128> {
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[..16]);
        self.0[16..]
            .iter()
            .all(|b| *b == 0)
            .then(|| u128::from_le_bytes(low))
    }
}

impl From<u128> for U256 {
    fn from(v: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&v.to_le_bytes());
        U256(bytes)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8; 32]) -> fmt::Result {
    f.write_str("0x")?;
    for b in bytes.iter().rev() {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i128() {
            Some(v) => write!(f, "{}", v),
            None => write_hex(f, &self.0),
        }
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u128() {
            Some(v) => write!(f, "{}", v),
            None => write_hex(f, &self.0),
        }
    }
}
