//! Pre-flight walk over a `Serialize` value that rejects NaN and infinities.
//!
//! `serde_json` quietly writes non-finite floats as `null`, which would give
//! `f64::INFINITY`, `f64::NAN` and `None` the same key.

use std::fmt;

use serde::Serialize;
use serde::ser::{self, Serializer};

#[derive(Debug)]
pub(crate) enum Rejection {
    NonFinite(f64),
    /// The value's own `Serialize` impl failed; the JSON pass reports it.
    Custom,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite(value) => write!(f, "non-finite float {value} has no JSON form"),
            Self::Custom => f.write_str("value failed to serialize"),
        }
    }
}

impl std::error::Error for Rejection {}

impl ser::Error for Rejection {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        Self::Custom
    }
}

/// Walks `value` without producing output.
pub(crate) fn check<T: Serialize + ?Sized>(value: &T) -> Result<(), Rejection> {
    value.serialize(FiniteCheck)
}

#[derive(Clone, Copy)]
struct FiniteCheck;

macro_rules! accept {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<(), Rejection> {
                Ok(())
            }
        )*
    };
}

impl Serializer for FiniteCheck {
    type Ok = ();
    type Error = Rejection;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_f32(self, v: f32) -> Result<(), Rejection> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), Rejection> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(Rejection::NonFinite(v))
        }
    }

    fn serialize_none(self) -> Result<(), Rejection> {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), Rejection> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Rejection> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Rejection> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), Rejection> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, Rejection> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Rejection> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), Rejection> {
        key.serialize(*self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = Rejection;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Rejection> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), Rejection> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn finite_values_pass() {
        assert!(check(&(1.5_f64, Some(2.0_f32), "x", vec![0_u8; 3])).is_ok());
    }

    #[test]
    fn non_finite_floats_are_found_when_nested() {
        let mut map = BTreeMap::new();
        map.insert("ok", vec![1.0]);
        map.insert("bad", vec![2.0, f64::NEG_INFINITY]);
        assert!(matches!(check(&map), Err(Rejection::NonFinite(v)) if v == f64::NEG_INFINITY));
        assert!(matches!(check(&Some(f32::NAN)), Err(Rejection::NonFinite(v)) if v.is_nan()));
    }
}
