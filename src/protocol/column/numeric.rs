//! Fixed-width column storage and numeric coercion rules.

use crate::error::ChResult;
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::{I256, U256, Value};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Plain-old-data element stored back to back on the wire.
pub(crate) trait Fixed: Copy + 'static {
    const SIZE: usize;

    fn put(self, buf: &mut BytesMut);

    /// `bytes` is exactly `SIZE` long.
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_fixed_le {
    ($($t:ty),*) => {
        $(
            impl Fixed for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn put(self, buf: &mut BytesMut) {
                    buf.put_slice(&self.to_le_bytes());
                }

                fn get(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_fixed_le!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Fixed for bool {
    const SIZE: usize = 1;

    fn put(self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(self));
    }

    fn get(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl Fixed for I256 {
    const SIZE: usize = 32;

    fn put(self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(bytes);
        I256(raw)
    }
}

impl Fixed for U256 {
    const SIZE: usize = 32;

    fn put(self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(bytes);
        U256(raw)
    }
}

/// Two little-endian `u64` halves, most significant half first.
impl Fixed for Uuid {
    const SIZE: usize = 16;

    fn put(self, buf: &mut BytesMut) {
        let (high, low) = self.as_u64_pair();
        buf.put_u64_le(high);
        buf.put_u64_le(low);
    }

    fn get(bytes: &[u8]) -> Self {
        let high = u64::get(&bytes[..8]);
        let low = u64::get(&bytes[8..]);
        Uuid::from_u64_pair(high, low)
    }
}

impl Fixed for Ipv4Addr {
    const SIZE: usize = 4;

    fn put(self, buf: &mut BytesMut) {
        buf.put_u32_le(u32::from(self));
    }

    fn get(bytes: &[u8]) -> Self {
        Ipv4Addr::from(u32::get(bytes))
    }
}

impl Fixed for Ipv6Addr {
    const SIZE: usize = 16;

    fn put(self, buf: &mut BytesMut) {
        buf.put_slice(&self.octets());
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ipv6Addr::from(raw)
    }
}

/// All-zero element: `0`, `false`, the nil UUID, `0.0.0.0`, `::`.
pub(crate) fn zero<T: Fixed>() -> T {
    T::get(&[0u8; 32][..T::SIZE])
}

pub(crate) fn encode_fixed<T: Fixed>(values: &[T], buf: &mut BytesMut) {
    buf.reserve(values.len() * T::SIZE);
    for v in values {
        v.put(buf);
    }
}

pub(crate) fn decode_fixed<T: Fixed>(
    values: &mut Vec<T>,
    r: &mut dyn WireRead,
    rows: usize,
) -> ChResult<()> {
    let bytes = take_rows(r, rows, T::SIZE)?;
    values.reserve(rows);
    values.extend(bytes.chunks_exact(T::SIZE).map(T::get));
    Ok(())
}

/// Row bytes, used as dictionary keys by `LowCardinality`.
pub(crate) fn fixed_key<T: Fixed>(v: T) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(T::SIZE);
    v.put(&mut buf);
    buf.to_vec()
}

// ==================== Width rules ====================

/// Value of an unsigned integer column of `bits`. Only unsigned values
/// no wider than the column fit.
pub(crate) fn unsigned_of(value: &Value, bits: u32) -> Option<u128> {
    let (v, width) = match value {
        Value::UInt8(v) => (*v as u128, 8),
        Value::UInt16(v) => (*v as u128, 16),
        Value::UInt32(v) => (*v as u128, 32),
        Value::UInt64(v) => (*v as u128, 64),
        Value::UInt128(v) => (*v, 128),
        _ => return None,
    };
    (width <= bits).then_some(v)
}

/// Value of a signed integer column of `bits`. Signed values no wider than
/// the column fit, and unsigned values strictly narrower than it.
pub(crate) fn signed_of(value: &Value, bits: u32) -> Option<i128> {
    let (v, width, signed) = match value {
        Value::Int8(v) => (*v as i128, 8, true),
        Value::Int16(v) => (*v as i128, 16, true),
        Value::Int32(v) => (*v as i128, 32, true),
        Value::Int64(v) => (*v as i128, 64, true),
        Value::Int128(v) => (*v, 128, true),
        Value::UInt8(v) => (*v as i128, 8, false),
        Value::UInt16(v) => (*v as i128, 16, false),
        Value::UInt32(v) => (*v as i128, 32, false),
        Value::UInt64(v) => (*v as i128, 64, false),
        _ => return None,
    };
    let fits = if signed { width <= bits } else { width < bits };
    fits.then_some(v)
}

pub(crate) fn u256_of(value: &Value) -> Option<U256> {
    match value {
        Value::UInt256(v) => Some(*v),
        other => unsigned_of(other, 128).map(U256::from),
    }
}

pub(crate) fn i256_of(value: &Value) -> Option<I256> {
    match value {
        Value::Int256(v) => Some(*v),
        Value::UInt128(v) => Some(I256(U256::from(*v).0)),
        other => signed_of(other, 128).map(I256::from),
    }
}

pub(crate) fn f32_of(value: &Value) -> Option<f32> {
    match value {
        Value::Float32(v) => Some(*v),
        _ => None,
    }
}

pub(crate) fn f64_of(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        _ => None,
    }
}

// ==================== BFloat16 ====================

/// Upper 16 bits of the `f32`. NaN becomes the quiet NaN of the same sign.
pub fn f32_to_bf16(v: f32) -> u16 {
    let bits = v.to_bits();
    if v.is_nan() {
        return ((bits >> 16) as u16 & 0x8000) | 0x7fc0;
    }
    (bits >> 16) as u16
}

pub fn bf16_to_f32(v: u16) -> f32 {
    f32::from_bits(u32::from(v) << 16)
}
