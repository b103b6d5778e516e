use std::fmt;
use std::io::{Read, Write};

use crate::codec::{WireReader, WireWriter};
use crate::error::{Result, WireError};

/// Which endpoint allocated a handle.
///
/// Handles are only meaningful relative to the endpoint that exposes them;
/// carrying the origin on the wire removes any ambiguity when both sides
/// allocate handles independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The host runtime's reference table.
    Host,
    /// The remote scripting runtime's reference table.
    Remote,
}

impl Origin {
    pub fn flag(self) -> u8 {
        match self {
            Origin::Host => 0,
            Origin::Remote => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(Origin::Host),
            1 => Ok(Origin::Remote),
            other => Err(WireError::InvalidOrigin(other)),
        }
    }

    /// The other side of the channel.
    pub fn opposite(self) -> Self {
        match self {
            Origin::Host => Origin::Remote,
            Origin::Remote => Origin::Host,
        }
    }
}

/// Handle identifying an object in one endpoint's reference table.
///
/// Non-negative 32-bit, unique for the lifetime of the exposing table and
/// never reused. Handle 0 is reserved for the root object each side exposes
/// at session start.
pub type Handle = u32;

/// The root object handle.
pub const ROOT_HANDLE: Handle = 0;

/// A reference to an object held in one endpoint's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub origin: Origin,
    pub handle: Handle,
}

impl ObjectRef {
    pub fn new(origin: Origin, handle: Handle) -> Self {
        Self { origin, handle }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.origin, self.handle)
    }
}

const TAG_NULL: u8 = 0;
const TAG_UNDEFINED: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_OBJECT: u8 = 6;
const TAG_FUNCTION: u8 = 7;

/// Every value that can cross the channel boundary.
///
/// Narrower numeric types of either runtime (bytes, chars, shorts, floats)
/// are normalized to `Int` or `Double` before marshaling; the boundary only
/// preserves numeric value and the int/float distinction, not source width.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
    /// An object exposed by the endpoint named in the ref's origin.
    Object(ObjectRef),
    /// A function exposed by the endpoint named in the ref's origin.
    Function(ObjectRef),
}

impl Value {
    /// Encode this value as `[1-byte tag][payload]`.
    pub fn encode<W: Write>(&self, writer: &mut WireWriter<W>) -> Result<()> {
        match self {
            Value::Null => writer.write_u8(TAG_NULL),
            Value::Undefined => writer.write_u8(TAG_UNDEFINED),
            Value::Bool(b) => {
                writer.write_u8(TAG_BOOL);
                writer.write_bool(*b);
            }
            Value::Int(i) => {
                writer.write_u8(TAG_INT);
                writer.write_i32(*i);
            }
            Value::Double(d) => {
                writer.write_u8(TAG_DOUBLE);
                writer.write_f64(*d);
            }
            Value::Str(s) => {
                writer.write_u8(TAG_STR);
                writer.write_string(s)?;
            }
            Value::Object(r) => {
                writer.write_u8(TAG_OBJECT);
                writer.write_u8(r.origin.flag());
                writer.write_u32(r.handle);
            }
            Value::Function(r) => {
                writer.write_u8(TAG_FUNCTION);
                writer.write_u8(r.origin.flag());
                writer.write_u32(r.handle);
            }
        }
        Ok(())
    }

    /// Decode a value from its tag byte onward.
    pub fn decode<R: Read>(reader: &mut WireReader<R>) -> Result<Self> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            TAG_NULL => Value::Null,
            TAG_UNDEFINED => Value::Undefined,
            TAG_BOOL => Value::Bool(reader.read_bool()?),
            TAG_INT => Value::Int(reader.read_i32()?),
            TAG_DOUBLE => Value::Double(reader.read_f64()?),
            TAG_STR => Value::Str(reader.read_string()?),
            TAG_OBJECT => Value::Object(Self::decode_ref(reader)?),
            TAG_FUNCTION => Value::Function(Self::decode_ref(reader)?),
            other => return Err(WireError::InvalidValueTag(other)),
        })
    }

    fn decode_ref<R: Read>(reader: &mut WireReader<R>) -> Result<ObjectRef> {
        let origin = Origin::from_flag(reader.read_u8()?)?;
        let handle = reader.read_u32()?;
        Ok(ObjectRef::new(origin, handle))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: `Int` widens losslessly into `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object/function reference carried by this value, if any.
    pub fn object_ref(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(r) | Value::Function(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(r) => write!(f, "object({r})"),
            Value::Function(r) => write!(f, "function({r})"),
        }
    }
}
