//! Serializers which write addresses as hex strings in human readable formats.
//!
//! Descriptor files are edited by hand, so `0x2000_0a00` reads better than
//! `536873472`. Binary formats keep the plain integers.

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::Serializer;
use std::ops::Range;

/// Unsigned integers that can be written as plain numbers.
pub(crate) trait SerializeUnsignedInt: std::fmt::LowerHex + Copy {
    fn serialize_int<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error>;
}

macro_rules! impl_serialize_unsigned_int {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl SerializeUnsignedInt for $ty {
                fn serialize_int<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.$method(self)
                }
            }
        )*
    };
}

impl_serialize_unsigned_int!(u8 => serialize_u8, u16 => serialize_u16, u32 => serialize_u32, u64 => serialize_u64);

struct Hex<T>(T);

impl<T: SerializeUnsignedInt> serde::Serialize for Hex<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex_u_int(&self.0, serializer)
    }
}

pub(crate) fn hex_u_int<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: SerializeUnsignedInt,
    S: Serializer,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&format!("{:#x}", value))
    } else {
        value.serialize_int(serializer)
    }
}

pub(crate) fn hex_option<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: SerializeUnsignedInt,
    S: Serializer,
{
    match value {
        Some(value) => serializer.serialize_some(&Hex(*value)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn hex_vec<T, S>(values: &[T], serializer: S) -> Result<S::Ok, S::Error>
where
    T: SerializeUnsignedInt,
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for value in values {
        seq.serialize_element(&Hex(*value))?;
    }
    seq.end()
}

pub(crate) fn hex_range<S>(range: &Range<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut state = serializer.serialize_struct("Range", 2)?;
    state.serialize_field("start", &Hex(range.start))?;
    state.serialize_field("end", &Hex(range.end))?;
    state.end()
}
