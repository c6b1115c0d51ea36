//! Fixed-width byte buffers used in rollup public inputs.

/// 32-byte buffer, used for field elements, merkle roots and hashes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Buf32(pub [u8; 32]);
impl_buf!(Buf32, 32);

/// 64-byte buffer, used for note commitments (two field elements).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Buf64(pub [u8; 64]);
impl_buf!(Buf64, 64);

impl Buf64 {
    /// Builds a note commitment out of its two 32-byte halves.
    pub fn from_halves(hi: Buf32, lo: Buf32) -> Self {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&hi.0);
        out[32..].copy_from_slice(&lo.0);
        Self(out)
    }

    /// Splits into the high and low 32-byte halves.
    pub fn halves(&self) -> (Buf32, Buf32) {
        let mut hi = [0u8; 32];
        let mut lo = [0u8; 32];
        hi.copy_from_slice(&self.0[..32]);
        lo.copy_from_slice(&self.0[32..]);
        (Buf32(hi), Buf32(lo))
    }
}

/// 20-byte account address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address20(pub [u8; 20]);
impl_buf!(Address20, 20);

/// 16-byte nullifier value.
///
/// On the wire a nullifier occupies a full 32-byte slot with the value in the low 16 bytes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nullifier(pub [u8; 16]);
impl_buf!(Nullifier, 16);

impl From<u128> for Nullifier {
    fn from(value: u128) -> Self {
        Self(value.to_be_bytes())
    }
}

impl From<Nullifier> for u128 {
    fn from(value: Nullifier) -> Self {
        u128::from_be_bytes(value.0)
    }
}
