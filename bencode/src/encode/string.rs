use serde::{ser, Serialize};
use crate::error::{Error, Result};

// Bencode dict keys must be byte strings. This serializer extracts the raw
// key bytes without the length prefix that the full Encoder would add, so
// SerializeMap can sort keys before writing them out.
pub struct StringSerializer;

fn unsupported(what: &str) -> Error {
    Error::InvalidType(format!("dictionary keys must be strings or byte strings, found {}", what))
}

impl ser::Serializer for &mut StringSerializer {
    type Ok = Vec<u8>;
    type Error = Error;

    type SerializeSeq = ser::Impossible<Vec<u8>, Error>;
    type SerializeMap = ser::Impossible<Vec<u8>, Error>;
    type SerializeStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeStructVariant = ser::Impossible<Vec<u8>, Error>;
    type SerializeTuple = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleVariant = ser::Impossible<Vec<u8>, Error>;

    fn serialize_str(self, v: &str) -> Result<Vec<u8>> { Ok(v.as_bytes().to_vec()) }
    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>> { Ok(v.to_vec()) }
    fn serialize_char(self, v: char) -> Result<Vec<u8>> {
        let mut buf = [0; 4];
        Ok(v.encode_utf8(&mut buf).as_bytes().to_vec())
    }

    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<Vec<u8>>
        where T: Serialize
    {
        value.serialize(self)
    }

    fn serialize_bool(self, _: bool) -> Result<Vec<u8>> { Err(unsupported("bool")) }
    fn serialize_i8(self, _: i8) -> Result<Vec<u8>> { Err(unsupported("i8")) }
    fn serialize_i16(self, _: i16) -> Result<Vec<u8>> { Err(unsupported("i16")) }
    fn serialize_i32(self, _: i32) -> Result<Vec<u8>> { Err(unsupported("i32")) }
    fn serialize_i64(self, _: i64) -> Result<Vec<u8>> { Err(unsupported("i64")) }
    fn serialize_u8(self, _: u8) -> Result<Vec<u8>> { Err(unsupported("u8")) }
    fn serialize_u16(self, _: u16) -> Result<Vec<u8>> { Err(unsupported("u16")) }
    fn serialize_u32(self, _: u32) -> Result<Vec<u8>> { Err(unsupported("u32")) }
    fn serialize_u64(self, _: u64) -> Result<Vec<u8>> { Err(unsupported("u64")) }
    fn serialize_f32(self, _: f32) -> Result<Vec<u8>> { Err(unsupported("f32")) }
    fn serialize_f64(self, _: f64) -> Result<Vec<u8>> { Err(unsupported("f64")) }
    fn serialize_none(self) -> Result<Vec<u8>> { Err(unsupported("none")) }
    fn serialize_some<T: ?Sized>(self, _: &T) -> Result<Vec<u8>> where T: Serialize { Err(unsupported("option")) }
    fn serialize_unit(self) -> Result<Vec<u8>> { Err(unsupported("unit")) }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Vec<u8>> { Err(unsupported("unit struct")) }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<Vec<u8>> { Err(unsupported("unit variant")) }
    fn serialize_newtype_variant<T: ?Sized>(self, _: &'static str, _: u32, _: &'static str, _: &T) -> Result<Vec<u8>> where T: Serialize { Err(unsupported("newtype variant")) }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq> { Err(unsupported("sequence")) }
    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> { Err(unsupported("tuple")) }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeTupleStruct> { Err(unsupported("tuple struct")) }
    fn serialize_tuple_variant(self, _: &'static str, _: u32, _: &'static str, _: usize) -> Result<Self::SerializeTupleVariant> { Err(unsupported("tuple variant")) }
    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> { Err(unsupported("map")) }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> { Err(unsupported("struct")) }
    fn serialize_struct_variant(self, _: &'static str, _: u32, _: &'static str, _: usize) -> Result<Self::SerializeStructVariant> { Err(unsupported("struct variant")) }
}
