//! Fixed-width field schema.

use rollup_primitives::{Address20, Buf32, Buf64, Nullifier};

use crate::error::{CodecError, CodecResult};

/// A value occupying a fixed number of bytes on the wire.
///
/// `write` is handed a slice of exactly `WIDTH` zeroed bytes; `read` is handed exactly
/// `WIDTH` bytes.
pub trait FixedField: Sized {
    const WIDTH: usize;

    fn write(&self, out: &mut [u8]);

    fn read(input: &[u8], field: &'static str) -> CodecResult<Self>;
}

impl FixedField for u32 {
    const WIDTH: usize = 4;

    fn write(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_be_bytes());
    }

    fn read(input: &[u8], _field: &'static str) -> CodecResult<Self> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(input);
        Ok(u32::from_be_bytes(buf))
    }
}

impl FixedField for Buf32 {
    const WIDTH: usize = 32;

    fn write(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.0);
    }

    fn read(input: &[u8], _field: &'static str) -> CodecResult<Self> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(input);
        Ok(Buf32(buf))
    }
}

impl FixedField for Buf64 {
    const WIDTH: usize = 64;

    fn write(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.0);
    }

    fn read(input: &[u8], _field: &'static str) -> CodecResult<Self> {
        let mut buf = [0u8; 64];
        buf.copy_from_slice(input);
        Ok(Buf64(buf))
    }
}

/// Nullifiers sit right-aligned in a 32-byte slot; the top 16 bytes are zero.
impl FixedField for Nullifier {
    const WIDTH: usize = 32;

    fn write(&self, out: &mut [u8]) {
        write_right_aligned(out, &self.0);
    }

    fn read(input: &[u8], field: &'static str) -> CodecResult<Self> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(read_right_aligned(input, 16, field)?);
        Ok(Nullifier(buf))
    }
}

/// Addresses sit right-aligned in a 32-byte slot; the top 12 bytes are zero.
impl FixedField for Address20 {
    const WIDTH: usize = 32;

    fn write(&self, out: &mut [u8]) {
        write_right_aligned(out, &self.0);
    }

    fn read(input: &[u8], field: &'static str) -> CodecResult<Self> {
        let mut buf = [0u8; 20];
        buf.copy_from_slice(read_right_aligned(input, 20, field)?);
        Ok(Address20(buf))
    }
}

fn write_right_aligned(out: &mut [u8], value: &[u8]) {
    let pad = out.len() - value.len();
    out[..pad].fill(0);
    out[pad..].copy_from_slice(value);
}

fn read_right_aligned<'a>(
    input: &'a [u8],
    value_len: usize,
    field: &'static str,
) -> CodecResult<&'a [u8]> {
    let (pad, value) = input.split_at(input.len() - value_len);
    if pad.iter().any(|b| *b != 0) {
        return Err(CodecError::NonZeroPadding { field });
    }
    Ok(value)
}

/// Declares a struct whose fields are laid out back to back in declaration order, and
/// generates `SIZE`, `write_to` and `read_from` for it with the struct's visibility.
macro_rules! fixed_layout {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident: $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $name {
            /// Encoded size in bytes.
            $vis const SIZE: usize = 0 $(+ <$ty as $crate::field::FixedField>::WIDTH)*;

            /// Appends the encoded record to `out`.
            $vis fn write_to(&self, out: &mut Vec<u8>) {
                $(
                    let start = out.len();
                    out.resize(start + <$ty as $crate::field::FixedField>::WIDTH, 0);
                    $crate::field::FixedField::write(&self.$field, &mut out[start..]);
                )*
            }

            /// Decodes a record from exactly [`Self::SIZE`] bytes.
            $vis fn read_from(input: &[u8]) -> $crate::error::CodecResult<Self> {
                if input.len() != Self::SIZE {
                    return Err($crate::error::CodecError::Truncated {
                        what: stringify!($name),
                        needed: Self::SIZE,
                        available: input.len(),
                    });
                }

                let mut rest = input;
                $(
                    let (chunk, tail) =
                        rest.split_at(<$ty as $crate::field::FixedField>::WIDTH);
                    let $field = <$ty as $crate::field::FixedField>::read(
                        chunk,
                        stringify!($field),
                    )?;
                    rest = tail;
                )*
                debug_assert!(rest.is_empty());

                Ok(Self { $($field),* })
            }
        }
    };
}
