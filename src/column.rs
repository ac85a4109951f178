//! C4: one typed, fixed-capacity columnar buffer per registered component
//! (spec.md §3 "Component Column", §4.4 "Columnar Storage").
//!
//! Every field gets its own backing buffer, matching the schema-per-field
//! layout called for in spec.md §4.4. Numeric/boolean/enum/ref fields use
//! per-element atomics (so concurrent readers/writers from worker threads
//! never need a lock); string/binary/array/tuple/buffer fields are stored as
//! flat `AtomicU8` blobs with whole-value copy-in/copy-out, since the spec
//! only requires true word-level atomicity for the numeric fast path (§4.4,
//! §9 "Open questions").

use std::sync::atomic::{AtomicI16, AtomicI32, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::entity_table::NULL_REF;
use crate::event_ring::{EventRing, EventType};
use crate::schema::{FieldDef, FieldValue, NumberType, NumberValue, Schema};

/// Reserved entity id used in `CHANGED` events for singleton columns, and as
/// the sole element of singleton-query results (spec.md §3, §6).
pub const SINGLETON_ENTITY_ID: u32 = 0xFFFF_FFFF;

fn numeric_slot_size(ty: NumberType) -> usize {
    ty.byte_size()
}

/// Per-field backing storage, one variant per `FieldDef` shape.
enum FieldSlot {
    Number { ty: NumberType, buf: NumericBuffer },
    Boolean(Vec<AtomicU8>),
    /// `capacity * (max_bytes + 4)` bytes: 4-byte LE length prefix + data.
    String { data: Vec<AtomicU8>, max_bytes: usize },
    Binary { data: Vec<AtomicU8>, max_bytes: usize },
    Enum { values: Vec<String>, data: Vec<AtomicU16> },
    /// `capacity` entries of `4 + max_length * elem_size` bytes.
    Array {
        element: FieldDef,
        elem_size: usize,
        max_length: usize,
        data: Vec<AtomicU8>,
    },
    /// `capacity` entries of `length * elem_size` bytes, no length prefix.
    Tuple {
        element: FieldDef,
        elem_size: usize,
        length: usize,
        data: Vec<AtomicU8>,
    },
    /// Identical layout to a numeric tuple.
    Buffer { ty: NumberType, size: usize, data: Vec<AtomicU8> },
    Ref(Vec<AtomicU32>),
}

enum NumericBuffer {
    U8(Vec<AtomicU8>),
    U16(Vec<AtomicU16>),
    U32(Vec<AtomicU32>),
    I8(Vec<AtomicI8>),
    I16(Vec<AtomicI16>),
    I32(Vec<AtomicI32>),
    F32(Vec<AtomicU32>),
    F64(Vec<AtomicU64>),
}

impl NumericBuffer {
    fn new(ty: NumberType, capacity: usize) -> Self {
        match ty {
            NumberType::U8 => NumericBuffer::U8((0..capacity).map(|_| AtomicU8::new(0)).collect()),
            NumberType::U16 => NumericBuffer::U16((0..capacity).map(|_| AtomicU16::new(0)).collect()),
            NumberType::U32 => NumericBuffer::U32((0..capacity).map(|_| AtomicU32::new(0)).collect()),
            NumberType::I8 => NumericBuffer::I8((0..capacity).map(|_| AtomicI8::new(0)).collect()),
            NumberType::I16 => NumericBuffer::I16((0..capacity).map(|_| AtomicI16::new(0)).collect()),
            NumberType::I32 => NumericBuffer::I32((0..capacity).map(|_| AtomicI32::new(0)).collect()),
            NumberType::F32 => NumericBuffer::F32((0..capacity).map(|_| AtomicU32::new(0)).collect()),
            NumberType::F64 => NumericBuffer::F64((0..capacity).map(|_| AtomicU64::new(0)).collect()),
        }
    }

    fn read(&self, index: usize) -> NumberValue {
        match self {
            NumericBuffer::U8(v) => NumberValue::U8(v[index].load(Ordering::Acquire)),
            NumericBuffer::U16(v) => NumberValue::U16(v[index].load(Ordering::Acquire)),
            NumericBuffer::U32(v) => NumberValue::U32(v[index].load(Ordering::Acquire)),
            NumericBuffer::I8(v) => NumberValue::I8(v[index].load(Ordering::Acquire)),
            NumericBuffer::I16(v) => NumberValue::I16(v[index].load(Ordering::Acquire)),
            NumericBuffer::I32(v) => NumberValue::I32(v[index].load(Ordering::Acquire)),
            NumericBuffer::F32(v) => NumberValue::F32(f32::from_bits(v[index].load(Ordering::Acquire))),
            NumericBuffer::F64(v) => NumberValue::F64(f64::from_bits(v[index].load(Ordering::Acquire))),
        }
    }

    fn write(&self, index: usize, value: NumberValue) {
        match (self, value) {
            (NumericBuffer::U8(v), NumberValue::U8(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::U16(v), NumberValue::U16(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::U32(v), NumberValue::U32(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::I8(v), NumberValue::I8(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::I16(v), NumberValue::I16(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::I32(v), NumberValue::I32(x)) => v[index].store(x, Ordering::Release),
            (NumericBuffer::F32(v), NumberValue::F32(x)) => v[index].store(x.to_bits(), Ordering::Release),
            (NumericBuffer::F64(v), NumberValue::F64(x)) => v[index].store(x.to_bits(), Ordering::Release),
            // A mismatched variant is a schema bug, not a runtime condition
            // callers can trigger; coerce through the type's own default
            // rather than panicking in a shared-memory data plane.
            (buf, _) => buf.write(index, NumberValue::default_for(buf.number_type())),
        }
    }

    fn number_type(&self) -> NumberType {
        match self {
            NumericBuffer::U8(_) => NumberType::U8,
            NumericBuffer::U16(_) => NumberType::U16,
            NumericBuffer::U32(_) => NumberType::U32,
            NumericBuffer::I8(_) => NumberType::I8,
            NumericBuffer::I16(_) => NumberType::I16,
            NumericBuffer::I32(_) => NumberType::I32,
            NumericBuffer::F32(_) => NumberType::F32,
            NumericBuffer::F64(_) => NumberType::F64,
        }
    }
}

fn elem_slot_size(def: &FieldDef) -> usize {
    match def {
        FieldDef::Number(ty) => numeric_slot_size(*ty),
        FieldDef::Boolean => 1,
        FieldDef::String { max_bytes } | FieldDef::Binary { max_bytes } => max_bytes + 4,
        _ => unreachable!("validated at schema construction: only flat element types reach here"),
    }
}

fn read_u32_le(bytes: &[AtomicU8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    for (i, slot) in b.iter_mut().enumerate() {
        *slot = bytes[offset + i].load(Ordering::Acquire);
    }
    u32::from_le_bytes(b)
}

fn write_u32_le(bytes: &[AtomicU8], offset: usize, value: u32) {
    for (i, byte) in value.to_le_bytes().iter().enumerate() {
        bytes[offset + i].store(*byte, Ordering::Release);
    }
}

fn read_bytes(bytes: &[AtomicU8], offset: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| bytes[offset + i].load(Ordering::Acquire)).collect()
}

fn write_bytes(bytes: &[AtomicU8], offset: usize, data: &[u8]) {
    for (i, b) in data.iter().enumerate() {
        bytes[offset + i].store(*b, Ordering::Release);
    }
}

fn encode_flat(def: &FieldDef, value: &FieldValue, bytes: &[AtomicU8], offset: usize, slot_size: usize) {
    match (def, value) {
        (FieldDef::Number(ty), FieldValue::Number(n)) => {
            let raw = numeric_to_le_bytes(*ty, *n);
            write_bytes(bytes, offset, &raw);
        }
        (FieldDef::Boolean, FieldValue::Boolean(b)) => {
            bytes[offset].store(if *b { 1 } else { 0 }, Ordering::Release);
        }
        (FieldDef::String { max_bytes }, FieldValue::String(s)) => {
            let clipped = &s.as_bytes()[..s.len().min(*max_bytes)];
            write_u32_le(bytes, offset, clipped.len() as u32);
            write_bytes(bytes, offset + 4, clipped);
        }
        (FieldDef::Binary { max_bytes }, FieldValue::Binary(data)) => {
            let clipped = &data[..data.len().min(*max_bytes)];
            write_u32_le(bytes, offset, clipped.len() as u32);
            write_bytes(bytes, offset + 4, clipped);
        }
        _ => {
            let _ = slot_size;
        }
    }
}

fn decode_flat(def: &FieldDef, bytes: &[AtomicU8], offset: usize) -> FieldValue {
    match def {
        FieldDef::Number(ty) => FieldValue::Number(numeric_from_le_bytes(*ty, &read_bytes(bytes, offset, ty.byte_size()))),
        FieldDef::Boolean => FieldValue::Boolean(bytes[offset].load(Ordering::Acquire) != 0),
        FieldDef::String { max_bytes } => {
            let len = (read_u32_le(bytes, offset) as usize).min(*max_bytes);
            let raw = read_bytes(bytes, offset + 4, len);
            FieldValue::String(String::from_utf8_lossy(&raw).into_owned())
        }
        FieldDef::Binary { max_bytes } => {
            let len = (read_u32_le(bytes, offset) as usize).min(*max_bytes);
            FieldValue::Binary(read_bytes(bytes, offset + 4, len))
        }
        _ => unreachable!(),
    }
}

fn numeric_to_le_bytes(ty: NumberType, value: NumberValue) -> Vec<u8> {
    match (ty, value) {
        (NumberType::U8, NumberValue::U8(x)) => vec![x],
        (NumberType::I8, NumberValue::I8(x)) => vec![x as u8],
        (NumberType::U16, NumberValue::U16(x)) => x.to_le_bytes().to_vec(),
        (NumberType::I16, NumberValue::I16(x)) => x.to_le_bytes().to_vec(),
        (NumberType::U32, NumberValue::U32(x)) => x.to_le_bytes().to_vec(),
        (NumberType::I32, NumberValue::I32(x)) => x.to_le_bytes().to_vec(),
        (NumberType::F32, NumberValue::F32(x)) => x.to_le_bytes().to_vec(),
        (NumberType::F64, NumberValue::F64(x)) => x.to_le_bytes().to_vec(),
        (ty, _) => numeric_to_le_bytes(ty, NumberValue::default_for(ty)),
    }
}

fn numeric_from_le_bytes(ty: NumberType, raw: &[u8]) -> NumberValue {
    match ty {
        NumberType::U8 => NumberValue::U8(raw[0]),
        NumberType::I8 => NumberValue::I8(raw[0] as i8),
        NumberType::U16 => NumberValue::U16(u16::from_le_bytes([raw[0], raw[1]])),
        NumberType::I16 => NumberValue::I16(i16::from_le_bytes([raw[0], raw[1]])),
        NumberType::U32 => NumberValue::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        NumberType::I32 => NumberValue::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        NumberType::F32 => NumberValue::F32(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        NumberType::F64 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[..8]);
            NumberValue::F64(f64::from_le_bytes(b))
        }
    }
}

impl FieldSlot {
    fn new(def: &FieldDef, capacity: usize) -> Self {
        match def {
            FieldDef::Number(ty) => FieldSlot::Number {
                ty: *ty,
                buf: NumericBuffer::new(*ty, capacity),
            },
            FieldDef::Boolean => FieldSlot::Boolean((0..capacity).map(|_| AtomicU8::new(0)).collect()),
            FieldDef::String { max_bytes } => FieldSlot::String {
                data: (0..capacity * (max_bytes + 4)).map(|_| AtomicU8::new(0)).collect(),
                max_bytes: *max_bytes,
            },
            FieldDef::Binary { max_bytes } => FieldSlot::Binary {
                data: (0..capacity * (max_bytes + 4)).map(|_| AtomicU8::new(0)).collect(),
                max_bytes: *max_bytes,
            },
            FieldDef::Enum { values } => FieldSlot::Enum {
                values: values.clone(),
                data: (0..capacity).map(|_| AtomicU16::new(0)).collect(),
            },
            FieldDef::Array { element, max_length } => {
                let elem_size = elem_slot_size(element);
                let slot_size = 4 + max_length * elem_size;
                FieldSlot::Array {
                    element: (**element).clone(),
                    elem_size,
                    max_length: *max_length,
                    data: (0..capacity * slot_size).map(|_| AtomicU8::new(0)).collect(),
                }
            }
            FieldDef::Tuple { element, length } => {
                let elem_size = elem_slot_size(element);
                FieldSlot::Tuple {
                    element: (**element).clone(),
                    elem_size,
                    length: *length,
                    data: (0..capacity * length * elem_size).map(|_| AtomicU8::new(0)).collect(),
                }
            }
            FieldDef::Buffer { element, size } => FieldSlot::Buffer {
                ty: *element,
                size: *size,
                data: (0..capacity * size * element.byte_size()).map(|_| AtomicU8::new(0)).collect(),
            },
            FieldDef::Ref => FieldSlot::Ref((0..capacity).map(|_| AtomicU32::new(NULL_REF)).collect()),
        }
    }

    fn read(&self, index: usize) -> FieldValue {
        match self {
            FieldSlot::Number { buf, .. } => FieldValue::Number(buf.read(index)),
            FieldSlot::Boolean(v) => FieldValue::Boolean(v[index].load(Ordering::Acquire) != 0),
            FieldSlot::String { data, max_bytes } => {
                let def = FieldDef::String { max_bytes: *max_bytes };
                decode_flat(&def, data, index * (max_bytes + 4))
            }
            FieldSlot::Binary { data, max_bytes } => {
                let def = FieldDef::Binary { max_bytes: *max_bytes };
                decode_flat(&def, data, index * (max_bytes + 4))
            }
            FieldSlot::Enum { data, .. } => FieldValue::Enum(data[index].load(Ordering::Acquire)),
            FieldSlot::Array { element, elem_size, max_length, data } => {
                let slot_size = 4 + max_length * elem_size;
                let base = index * slot_size;
                let len = (read_u32_le(data, base) as usize).min(*max_length);
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    items.push(decode_flat(element, data, base + 4 + i * elem_size));
                }
                FieldValue::Array(items)
            }
            FieldSlot::Tuple { element, elem_size, length, data } => {
                let base = index * length * elem_size;
                let mut items = Vec::with_capacity(*length);
                for i in 0..*length {
                    items.push(decode_flat(element, data, base + i * elem_size));
                }
                FieldValue::Tuple(items)
            }
            FieldSlot::Buffer { ty, size, data } => {
                let elem_size = ty.byte_size();
                let base = index * size * elem_size;
                let mut items = Vec::with_capacity(*size);
                for i in 0..*size {
                    items.push(numeric_from_le_bytes(*ty, &read_bytes(data, base + i * elem_size, elem_size)));
                }
                FieldValue::Buffer(items)
            }
            FieldSlot::Ref(v) => {
                let word = v[index].load(Ordering::Acquire);
                FieldValue::Ref(if word == NULL_REF { None } else { Some(word) })
            }
        }
    }

    fn write(&self, index: usize, value: &FieldValue) {
        match (self, value) {
            (FieldSlot::Number { ty, buf }, FieldValue::Number(n)) => {
                let _ = ty;
                buf.write(index, *n);
            }
            (FieldSlot::Boolean(v), FieldValue::Boolean(b)) => {
                v[index].store(if *b { 1 } else { 0 }, Ordering::Release);
            }
            (FieldSlot::String { data, max_bytes }, FieldValue::String(_)) => {
                let def = FieldDef::String { max_bytes: *max_bytes };
                encode_flat(&def, value, data, index * (max_bytes + 4), max_bytes + 4);
            }
            (FieldSlot::Binary { data, max_bytes }, FieldValue::Binary(_)) => {
                let def = FieldDef::Binary { max_bytes: *max_bytes };
                encode_flat(&def, value, data, index * (max_bytes + 4), max_bytes + 4);
            }
            (FieldSlot::Enum { values, data }, FieldValue::Enum(i)) => {
                let clamped = if (*i as usize) < values.len() { *i } else { 0 };
                data[index].store(clamped, Ordering::Release);
            }
            (FieldSlot::Array { element, elem_size, max_length, data }, FieldValue::Array(items)) => {
                let slot_size = 4 + max_length * elem_size;
                let base = index * slot_size;
                let len = items.len().min(*max_length);
                write_u32_le(data, base, len as u32);
                for (i, item) in items.iter().take(len).enumerate() {
                    encode_flat(element, item, data, base + 4 + i * elem_size, *elem_size);
                }
            }
            (FieldSlot::Tuple { element, elem_size, length, data }, FieldValue::Tuple(items)) => {
                let base = index * length * elem_size;
                for (i, item) in items.iter().take(*length).enumerate() {
                    encode_flat(element, item, data, base + i * elem_size, *elem_size);
                }
            }
            (FieldSlot::Buffer { ty, size, data }, FieldValue::Buffer(items)) => {
                let elem_size = ty.byte_size();
                let base = index * size * elem_size;
                for (i, item) in items.iter().take(*size).enumerate() {
                    write_bytes(data, base + i * elem_size, &numeric_to_le_bytes(*ty, *item));
                }
            }
            (FieldSlot::Ref(v), FieldValue::Ref(r)) => {
                v[index].store(r.unwrap_or(NULL_REF), Ordering::Release);
            }
            _ => {}
        }
    }

    fn default_value(&self, def: &FieldDef) -> FieldValue {
        def.default_value()
    }
}

/// Static metadata for a registered component, assigned at `World`
/// construction (spec.md §3 "stable 0-based `componentId`").
pub struct ColumnDef {
    pub component_id: u16,
    pub name: String,
    pub schema: Schema,
    pub is_singleton: bool,
}

/// The live, shared-memory backing store for one component across every
/// entity (or the one singleton slot).
pub struct Column {
    pub component_id: u16,
    pub name: String,
    pub schema: Schema,
    pub is_singleton: bool,
    capacity: usize,
    slots: Vec<FieldSlot>,
    registered: std::sync::atomic::AtomicBool,
}

impl Column {
    pub fn new(def: ColumnDef, max_entities: u32) -> Self {
        let capacity = if def.is_singleton { 1 } else { max_entities as usize };
        let slots = def
            .schema
            .iter()
            .map(|(_, field_def)| FieldSlot::new(field_def, capacity))
            .collect();
        Column {
            component_id: def.component_id,
            name: def.name,
            schema: def.schema,
            is_singleton: def.is_singleton,
            capacity,
            slots,
            registered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Marks this column as attached to a world. Returns `false` if it was
    /// already attached (spec.md §4.4 `AlreadyInitialized`).
    pub fn mark_registered(&self) -> bool {
        !self.registered.swap(true, Ordering::AcqRel)
    }

    fn row(&self, id: u32) -> usize {
        if self.is_singleton {
            0
        } else {
            id as usize
        }
    }

    fn event_entity_id(&self, id: u32) -> u32 {
        if self.is_singleton {
            SINGLETON_ENTITY_ID
        } else {
            id
        }
    }

    pub fn field_value(&self, id: u32, field_name: &str) -> Option<FieldValue> {
        let idx = self.schema.field_index(field_name)?;
        Some(self.slots[idx].read(self.row(id)))
    }

    pub fn set_field_value(&self, id: u32, field_name: &str, value: FieldValue) -> bool {
        match self.schema.field_index(field_name) {
            Some(idx) => {
                self.slots[idx].write(self.row(id), &value);
                true
            }
            None => false,
        }
    }

    /// Reads a `ref` field and resolves it against the current alive/
    /// generation state, self-healing it to `NULL` on a stale reference
    /// (spec.md §4.4 "Ref").
    pub fn read_ref(
        &self,
        id: u32,
        field_name: &str,
        is_alive: impl Fn(u32) -> bool,
        generation_of: impl Fn(u32) -> u8,
    ) -> Option<crate::entity_table::EntityId> {
        let idx = self.schema.field_index(field_name)?;
        let row = self.row(id);
        let raw = match &self.slots[idx] {
            FieldSlot::Ref(v) => v[row].load(Ordering::Acquire),
            _ => return None,
        };
        match crate::entity_table::EntityId::unpack(raw) {
            None => None,
            Some(entity) => {
                if is_alive(entity.index) && generation_of(entity.index) == entity.generation {
                    Some(entity)
                } else {
                    if let FieldSlot::Ref(v) = &self.slots[idx] {
                        v[row].store(NULL_REF, Ordering::Release);
                    }
                    None
                }
            }
        }
    }

    /// Full structural snapshot of every field for `id` (spec.md §4.4
    /// `snapshot`).
    pub fn snapshot(&self, id: u32) -> Vec<(String, FieldValue)> {
        let row = self.row(id);
        self.schema
            .iter()
            .zip(self.slots.iter())
            .map(|((name, _), slot)| (name.clone(), slot.read(row)))
            .collect()
    }

    /// Schema-default structure; does not require a live entity (spec.md
    /// §4.4 `default`).
    pub fn default_struct(&self) -> Vec<(String, FieldValue)> {
        self.schema
            .iter()
            .zip(self.slots.iter())
            .map(|((name, def), slot)| (name.clone(), slot.default_value(def)))
            .collect()
    }

    /// Overwrites every field of `id` with `patch`, filling any field absent
    /// from `patch` with its schema default, then emits one `CHANGED` event.
    pub fn copy(&self, event_ring: &EventRing, id: u32, patch: &[(String, FieldValue)]) {
        let row = self.row(id);
        for (i, (name, def)) in self.schema.iter().enumerate() {
            let value = patch
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| def.default_value());
            self.slots[i].write(row, &value);
        }
        event_ring.push(self.event_entity_id(id), EventType::Changed, self.component_id);
    }

    /// Overwrites only the fields present in `partial`, then emits one
    /// `CHANGED` event.
    pub fn patch(&self, event_ring: &EventRing, id: u32, partial: &[(String, FieldValue)]) {
        let row = self.row(id);
        for (name, value) in partial {
            if let Some(idx) = self.schema.field_index(name) {
                self.slots[idx].write(row, value);
            }
        }
        event_ring.push(self.event_entity_id(id), EventType::Changed, self.component_id);
    }

    /// Records intent to mutate `id` through field accessors and emits the
    /// `CHANGED` event up front (spec.md §4.4 write semantics).
    pub fn begin_write(&self, event_ring: &EventRing, id: u32) {
        event_ring.push(self.event_entity_id(id), EventType::Changed, self.component_id);
    }
}
