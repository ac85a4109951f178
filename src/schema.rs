//! Field descriptor variants and the owned `FieldValue` representation
//! returned by `Column::snapshot`/`Column::default` (spec.md §3 "Field
//! descriptor variants", §9 "Dynamic/structural field schemas → tagged
//! variants").

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Numeric element type, shared by `number`, array/tuple elements, and
/// `buffer` windows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NumberType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl NumberType {
    pub fn byte_size(self) -> usize {
        match self {
            NumberType::U8 | NumberType::I8 => 1,
            NumberType::U16 | NumberType::I16 => 2,
            NumberType::U32 | NumberType::I32 | NumberType::F32 => 4,
            NumberType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumberType::F32 | NumberType::F64)
    }
}

/// One concrete numeric value, tagged by its `NumberType`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumberValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
    F64(f64),
}

impl NumberValue {
    pub fn default_for(ty: NumberType) -> Self {
        match ty {
            NumberType::U8 => NumberValue::U8(0),
            NumberType::U16 => NumberValue::U16(0),
            NumberType::U32 => NumberValue::U32(0),
            NumberType::I8 => NumberValue::I8(0),
            NumberType::I16 => NumberValue::I16(0),
            NumberType::I32 => NumberValue::I32(0),
            NumberType::F32 => NumberValue::F32(0.0),
            NumberType::F64 => NumberValue::F64(0.0),
        }
    }

    pub fn number_type(self) -> NumberType {
        match self {
            NumberValue::U8(_) => NumberType::U8,
            NumberValue::U16(_) => NumberType::U16,
            NumberValue::U32(_) => NumberType::U32,
            NumberValue::I8(_) => NumberType::I8,
            NumberValue::I16(_) => NumberType::I16,
            NumberValue::I32(_) => NumberType::I32,
            NumberValue::F32(_) => NumberType::F32,
            NumberValue::F64(_) => NumberType::F64,
        }
    }
}

/// A field's declared type. Arrays and tuples may not nest, and their
/// element type is restricted to {number, boolean, string, binary}
/// (spec.md §3 invariants).
#[derive(Clone, Debug)]
pub enum FieldDef {
    Number(NumberType),
    Boolean,
    String { max_bytes: usize },
    Binary { max_bytes: usize },
    Enum { values: Vec<String> },
    Array { element: Box<FieldDef>, max_length: usize },
    Tuple { element: Box<FieldDef>, length: usize },
    Buffer { element: NumberType, size: usize },
    Ref,
}

impl FieldDef {
    pub fn enum_of<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        FieldDef::Enum { values }
    }

    fn is_nestable_element(&self) -> bool {
        matches!(
            self,
            FieldDef::Number(_) | FieldDef::Boolean | FieldDef::String { .. } | FieldDef::Binary { .. }
        )
    }

    /// Validates the invariant that array/tuple elements are flat
    /// (spec.md §3, §7 `InvalidSchema`).
    pub fn validate(&self) -> Result<()> {
        match self {
            FieldDef::Array { element, .. } | FieldDef::Tuple { element, .. } => {
                if !element.is_nestable_element() {
                    return Err(Error::InvalidSchema(
                        "array/tuple element type must be number, boolean, string, or binary"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldDef::Number(ty) => FieldValue::Number(NumberValue::default_for(*ty)),
            FieldDef::Boolean => FieldValue::Boolean(false),
            FieldDef::String { .. } => FieldValue::String(String::new()),
            FieldDef::Binary { .. } => FieldValue::Binary(Vec::new()),
            FieldDef::Enum { .. } => FieldValue::Enum(0),
            FieldDef::Array { .. } => FieldValue::Array(Vec::new()),
            FieldDef::Tuple { element, length } => {
                FieldValue::Tuple(vec![element.default_value(); *length])
            }
            FieldDef::Buffer { element, size } => {
                FieldValue::Buffer(vec![NumberValue::default_for(*element); *size])
            }
            FieldDef::Ref => FieldValue::Ref(None),
        }
    }
}

/// An owned, fully-materialized field value: what `snapshot`/`default`
/// return, safe to store or move across threads without aliasing a column.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Number(NumberValue),
    Boolean(bool),
    String(String),
    Binary(Vec<u8>),
    /// Index into the schema's sorted enum values.
    Enum(u16),
    Array(Vec<FieldValue>),
    Tuple(Vec<FieldValue>),
    Buffer(Vec<NumberValue>),
    /// The resolved packed-ref word, or `None` for null.
    Ref(Option<u32>),
}

/// Named fields of one component, in declaration order. Field order is
/// preserved (a `BTreeMap` would reorder lexicographically and change the
/// declared schema), but lookup by name still needs to be fast, so we keep
/// both the ordered vector and a name index.
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<(String, FieldDef)>,
    index: BTreeMap<String, usize>,
}

impl Schema {
    pub fn new(fields: Vec<(String, FieldDef)>) -> Result<Self> {
        for (_, def) in &fields {
            def.validate()?;
        }
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        Ok(Schema { fields, index })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&i| &self.fields[i].1)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldDef)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
