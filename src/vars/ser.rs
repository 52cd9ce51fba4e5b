//! A serializer that flattens nested values into dotted variable names.
//!
//! Scalars are stored as their string form, maps and structs add `.key` to
//! the name and sequences add `.index`. For example `{"a": {"b": [1, 2]}}`
//! is flattened to `a.b.0 = 1` and `a.b.1 = 2`.

use std::collections::HashMap;

use serde::ser::{Error as _, Impossible, Serialize};

use crate::{Error, Result};

/// Flattens the value into the pool.
///
/// If `name` is `None` then the value must be a map, struct or sequence and
/// each entry is stored under its own key.
pub fn flatten<T>(name: Option<&str>, value: &T, out: &mut HashMap<String, String>) -> Result<()>
where
    T: Serialize + ?Sized,
{
    value.serialize(Serializer {
        name: name.map(String::from),
        out,
    })
}

fn join(name: &Option<String>, key: &str) -> String {
    match name {
        Some(name) => format!("{name}.{key}"),
        None => key.to_owned(),
    }
}

/// Serializer that writes flattened entries into a variable pool.
pub struct Serializer<'a> {
    name: Option<String>,
    out: &'a mut HashMap<String, String>,
}

impl<'a> Serializer<'a> {
    fn scalar(self, value: String) -> Result<()> {
        match self.name {
            Some(name) => {
                self.out.insert(name, value);
                Ok(())
            }
            None => Err(Error::custom(
                "expected a map, struct or sequence of variables",
            )),
        }
    }

    fn nested(self, key: &str) -> Compound<'a> {
        Compound {
            name: Some(join(&self.name, key)),
            out: self.out,
            key: None,
            index: 0,
        }
    }

    fn compound(self) -> Compound<'a> {
        Compound {
            name: self.name,
            out: self.out,
            key: None,
            index: 0,
        }
    }
}

impl<'a> serde::Serializer for Serializer<'a> {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = Compound<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_f32(self, v: f32) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        self.scalar(v.to_string())
    }

    fn serialize_char(self, v: char) -> Result<()> {
        self.scalar(String::from(v))
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.scalar(String::from(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        use serde::ser::SerializeSeq;
        let mut seq = self.compound();
        for b in v {
            seq.serialize_element(b)?;
        }
        seq.end()
    }

    fn serialize_none(self) -> Result<()> {
        self.serialize_unit()
    }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        self.scalar(String::new())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()>
    where
        T: Serialize,
    {
        value.serialize(Serializer {
            name: Some(join(&self.name, variant)),
            out: self.out,
        })
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Ok(self.compound())
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Ok(self.compound())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Ok(self.compound())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Ok(self.nested(variant))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(self.compound())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Ok(self.compound())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Ok(self.nested(variant))
    }
}

/// Serializes the entries of a sequence, map or struct.
pub struct Compound<'a> {
    name: Option<String>,
    out: &'a mut HashMap<String, String>,
    key: Option<String>,
    index: usize,
}

impl Compound<'_> {
    fn entry<T>(&mut self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(Serializer {
            name: Some(join(&self.name, key)),
            out: &mut *self.out,
        })
    }

    fn element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let key = self.index.to_string();
        self.index += 1;
        self.entry(&key, value)
    }
}

impl serde::ser::SerializeSeq for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeTuple for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleStruct for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleVariant for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeMap for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized>(&mut self, key: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| Error::custom("serialize_value called before serialize_key"))?;
        self.entry(&key, value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeStruct for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.entry(key, value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl serde::ser::SerializeStructVariant for Compound<'_> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.entry(key, value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

/// Serializes map keys, only scalars are allowed.
struct KeySerializer;

fn key_error() -> Error {
    Error::custom("map key must be a string, integer, char or bool")
}

impl serde::Serializer for KeySerializer {
    type Ok = String;
    type Error = Error;

    type SerializeSeq = Impossible<String, Error>;
    type SerializeTuple = Impossible<String, Error>;
    type SerializeTupleStruct = Impossible<String, Error>;
    type SerializeTupleVariant = Impossible<String, Error>;
    type SerializeMap = Impossible<String, Error>;
    type SerializeStruct = Impossible<String, Error>;
    type SerializeStructVariant = Impossible<String, Error>;

    fn serialize_bool(self, v: bool) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, _v: f32) -> Result<String> {
        Err(key_error())
    }

    fn serialize_f64(self, _v: f64) -> Result<String> {
        Err(key_error())
    }

    fn serialize_char(self, v: char) -> Result<String> {
        Ok(String::from(v))
    }

    fn serialize_str(self, v: &str) -> Result<String> {
        Ok(String::from(v))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String> {
        Err(key_error())
    }

    fn serialize_none(self) -> Result<String> {
        Err(key_error())
    }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<String>
    where
        T: Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<String> {
        Err(key_error())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String> {
        Err(key_error())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String> {
        Ok(String::from(variant))
    }

    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<String>
    where
        T: Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String>
    where
        T: Serialize,
    {
        Err(key_error())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(key_error())
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(key_error())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(key_error())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(key_error())
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(key_error())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(key_error())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(key_error())
    }
}
