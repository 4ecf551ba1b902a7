//! Scalar and composite value kinds that can live at a map key or list position.

use crate::encoding::{Reader, Writer};
use crate::error::DocError;

/// The three composite shapes a `make*` operation can create.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ObjType {
    Map,
    List,
    Text,
}

impl ObjType {
    pub(crate) fn tag(self) -> u8 {
        match self {
            ObjType::Map => 0,
            ObjType::List => 1,
            ObjType::Text => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, DocError> {
        match tag {
            0 => Ok(ObjType::Map),
            1 => Ok(ObjType::List),
            2 => Ok(ObjType::Text),
            _ => Err(DocError::DecodeError),
        }
    }
}

/// A leaf value. `Counter` is a commutative increment-only scalar: concurrent
/// `inc` operations referencing the same `set` accumulate rather than conflict.
#[derive(Clone, Debug)]
pub enum ScalarValue {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    F64(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Counter(i64),
    Null,
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        use ScalarValue::*;
        match (self, other) {
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Counter(a), Counter(b)) => a == b,
            (Null, Null) => true,
            _ => false,
        }
    }
}

impl ScalarValue {
    /// The scalar-type tag this value carries, independent of its current contents.
    /// A write that overwrites an existing scalar slot keeps the slot's tag rather
    /// than re-inferring one from the new Rust value (see [`ScalarKind::infer`]).
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Str(_) => ScalarKind::Str,
            ScalarValue::Bytes(_) => ScalarKind::Bytes,
            ScalarValue::Int(_) => ScalarKind::Int,
            ScalarValue::F64(_) => ScalarKind::F64,
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::Timestamp(_) => ScalarKind::Timestamp,
            ScalarValue::Counter(_) => ScalarKind::Counter,
            ScalarValue::Null => ScalarKind::Null,
        }
    }

    pub(crate) fn encode(&self, w: &mut Writer) {
        match self {
            ScalarValue::Str(s) => {
                w.u8(0);
                w.str(s);
            }
            ScalarValue::Bytes(b) => {
                w.u8(1);
                w.bytes_with_len(b);
            }
            ScalarValue::Int(i) => {
                w.u8(2);
                w.ivarint(*i);
            }
            ScalarValue::F64(f) => {
                w.u8(3);
                w.fixed(&f.to_le_bytes());
            }
            ScalarValue::Bool(b) => {
                w.u8(4);
                w.u8(*b as u8);
            }
            ScalarValue::Timestamp(t) => {
                w.u8(5);
                w.ivarint(*t);
            }
            ScalarValue::Counter(c) => {
                w.u8(6);
                w.ivarint(*c);
            }
            ScalarValue::Null => {
                w.u8(7);
            }
        }
    }

    pub(crate) fn decode(r: &mut Reader) -> Result<Self, DocError> {
        Ok(match r.u8()? {
            0 => ScalarValue::Str(r.str()?.to_owned()),
            1 => ScalarValue::Bytes(r.bytes_with_len()?.to_vec()),
            2 => ScalarValue::Int(r.ivarint()?),
            3 => ScalarValue::F64(f64::from_le_bytes(r.fixed_array()?)),
            4 => ScalarValue::Bool(r.u8()? != 0),
            5 => ScalarValue::Timestamp(r.ivarint()?),
            6 => ScalarValue::Counter(r.ivarint()?),
            7 => ScalarValue::Null,
            _ => return Err(DocError::DecodeError),
        })
    }
}

/// The type tag of a scalar slot, independent of any particular value.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ScalarKind {
    Str,
    Bytes,
    Int,
    F64,
    Bool,
    Timestamp,
    Counter,
    Null,
}

impl ScalarKind {
    /// Infers a scalar kind from a freshly-written Rust value when no existing
    /// slot value is available to preserve the type of.
    pub fn infer(value: &ScalarValue) -> Self {
        value.kind()
    }
}

/// Controls whether a new insertion exactly at a mark's boundary inherits the mark.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Expand {
    Before,
    After,
    Both,
    None,
}

impl Expand {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Expand::Before => 0,
            Expand::After => 1,
            Expand::Both => 2,
            Expand::None => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, DocError> {
        match tag {
            0 => Ok(Expand::Before),
            1 => Ok(Expand::After),
            2 => Ok(Expand::Both),
            3 => Ok(Expand::None),
            _ => Err(DocError::DecodeError),
        }
    }

    pub fn expands_after(self) -> bool {
        matches!(self, Expand::After | Expand::Both)
    }

    pub fn expands_before(self) -> bool {
        matches!(self, Expand::Before | Expand::Both)
    }
}

/// A named attribute over a text range, e.g. `{name: "bold", start, end}`.
#[derive(Clone, Debug)]
pub struct MarkData {
    pub name: String,
    pub value: ScalarValue,
    pub expand: Expand,
}
