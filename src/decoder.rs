// nrbf-parser - A high-performance MS-NRBF binary parser.
// Copyright (C) 2026  driedpampas@proton.me
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::records::*;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::Read;

/// Nested records are decoded recursively (array elements, member values,
/// member references); this bounds how deep that recursion can go.
pub const RECURSION_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Catch decode errors mid-stream and return whatever was parsed so far,
    /// instead of aborting on the first one. Also relaxes duplicate-id
    /// registration from a hard error to a silent overwrite.
    pub best_effort: bool,
    /// Inline a `ClassWithId`'s referenced `ClassInfo` into its own node
    /// instead of leaving callers to look it up via `MetadataId`.
    pub expand: bool,
}

/// A location inside the decoded record forest, used to revisit and
/// overwrite a `MemberReference` placeholder once its target is known.
#[derive(Debug, Clone)]
pub(crate) struct RecordPath {
    pub top_level_index: usize,
    pub steps: Vec<PathStep>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PathStep {
    Values(usize),
}

pub(crate) fn get_node_mut<'a>(records: &'a mut [Node], path: &RecordPath) -> Option<&'a mut Node> {
    let mut node = records.get_mut(path.top_level_index)?;
    for step in &path.steps {
        let PathStep::Values(index) = step;
        node = node
            .as_map_mut()
            .and_then(|m| m.get_mut("Values"))
            .and_then(Node::as_seq_mut)
            .and_then(|s| s.get_mut(*index))?;
    }
    Some(node)
}

fn member_reference_id(node: &Node) -> Option<i32> {
    if node.record_type_name() != Some("MemberReference") {
        return None;
    }
    node.get("IdRef").and_then(Node::as_int).map(|v| v as i32)
}

#[derive(Clone)]
struct ClassMeta {
    class_info: ClassInfo,
    member_type_info: Option<MemberTypeInfo>,
    library_id: Option<i32>,
}

/// The product of a full parse: the top-level record stream plus the
/// lookup tables `backfill`/`crunch` need to resolve references.
pub struct Decoded {
    pub records: Vec<Node>,
    pub(crate) object_table: HashMap<i32, Node>,
    pub(crate) value_table: HashMap<i32, Node>,
    pub(crate) reference_list: Vec<(i32, RecordPath)>,
}

/// A decoder for MS-NRBF binary streams.
pub struct Decoder<R: Read> {
    reader: R,
    options: DecodeOptions,
    offset: usize,
    depth: usize,
    metadata_registry: HashMap<i32, ClassMeta>,
    library_registry: HashMap<i32, String>,
    object_table: HashMap<i32, Node>,
    value_table: HashMap<i32, Node>,
    reference_list: Vec<(i32, RecordPath)>,
    records: Vec<Node>,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R, options: DecodeOptions) -> Self {
        Self {
            reader,
            options,
            offset: 0,
            depth: 0,
            metadata_registry: HashMap::new(),
            library_registry: HashMap::new(),
            object_table: HashMap::new(),
            value_table: HashMap::new(),
            reference_list: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Decodes every top-level record up to and including `MessageEnd`
    /// (or end of stream). In `best_effort` mode a decode error is logged
    /// and whatever was parsed so far is returned instead of propagated.
    pub fn parse(mut self) -> Result<Decoded> {
        loop {
            let tag = match self.try_read_tag()? {
                Some(t) => t,
                None => break,
            };
            let path = RecordPath { top_level_index: self.records.len(), steps: Vec::new() };
            match self.decode_tagged_record(tag, &path) {
                Ok(node) => {
                    let is_end = node.record_type_name() == Some("MessageEnd");
                    log::debug!(
                        "decoded {} at offset {}",
                        node.record_type_name().unwrap_or("?"),
                        self.offset
                    );
                    self.records.push(node);
                    if is_end {
                        break;
                    }
                }
                Err(e) => {
                    if self.options.best_effort {
                        log::warn!("decode error, returning partial result: {e}");
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(Decoded {
            records: self.records,
            object_table: self.object_table,
            value_table: self.value_table,
            reference_list: self.reference_list,
        })
    }

    fn try_read_tag(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {
                self.offset += 1;
                Ok(Some(buf[0]))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn decode_next_nested(&mut self, path: &RecordPath) -> Result<Node> {
        let tag = self.read_u8("record tag")?;
        self.decode_tagged_record(tag, path)
    }

    fn decode_tagged_record(&mut self, tag: u8, path: &RecordPath) -> Result<Node> {
        self.depth += 1;
        if self.depth > RECURSION_LIMIT {
            self.depth -= 1;
            return Err(Error::RecursionLimit { limit: RECURSION_LIMIT });
        }
        let result = self.dispatch(tag, path);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, tag: u8, path: &RecordPath) -> Result<Node> {
        let record_type = RecordType::try_from(tag)?;
        match record_type {
            RecordType::SerializedStreamHeader => {
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("SerializedStreamHeader".into()));
                m.insert("RootId".into(), Node::Int(self.read_i32("RootId")? as i64));
                m.insert("HeaderId".into(), Node::Int(self.read_i32("HeaderId")? as i64));
                m.insert("MajorVersion".into(), Node::Int(self.read_i32("MajorVersion")? as i64));
                m.insert("MinorVersion".into(), Node::Int(self.read_i32("MinorVersion")? as i64));
                Ok(Node::Map(m))
            }
            RecordType::BinaryLibrary => {
                let library_id = self.read_i32("LibraryId")?;
                let library_name = self.read_length_prefixed_string()?;
                self.library_registry.insert(library_id, library_name.clone());
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("BinaryLibrary".into()));
                m.insert("LibraryId".into(), Node::Int(library_id as i64));
                m.insert("LibraryName".into(), Node::Str(library_name));
                Ok(Node::Map(m))
            }
            RecordType::SystemClassWithMembers
            | RecordType::ClassWithMembers
            | RecordType::SystemClassWithMembersAndTypes
            | RecordType::ClassWithMembersAndTypes => self.decode_class_record(record_type, path),
            RecordType::ClassWithId => self.decode_class_with_id(path),
            RecordType::BinaryObjectString => {
                let object_id = self.read_i32("ObjectId")?;
                let value = self.read_length_prefixed_string()?;
                let mut fields = IndexMap::new();
                fields.insert("RecordTypeEnum".into(), Node::Str("BinaryObjectString".into()));
                fields.insert("ObjectId".into(), Node::Int(object_id as i64));
                fields.insert("Value".into(), Node::Str(value));
                let snapshot = fields.clone();
                self.register_object(object_id, Node::Map(snapshot), None)?;
                Ok(Node::Map(fields))
            }
            RecordType::BinaryArray => self.decode_binary_array(path),
            RecordType::MemberReference => {
                let id_ref = self.read_i32("IdRef")?;
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("MemberReference".into()));
                m.insert("IdRef".into(), Node::Int(id_ref as i64));
                Ok(Node::Map(m))
            }
            RecordType::ObjectNull => {
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("ObjectNull".into()));
                Ok(Node::Map(m))
            }
            RecordType::MessageEnd => {
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("MessageEnd".into()));
                Ok(Node::Map(m))
            }
            RecordType::ObjectNullMultiple256 => {
                let null_count = self.read_u8("NullCount")? as i64;
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("ObjectNullMultiple256".into()));
                m.insert("NullCount".into(), Node::Int(null_count));
                Ok(Node::Map(m))
            }
            RecordType::ObjectNullMultiple => {
                let null_count = self.read_i32("NullCount")? as i64;
                let mut m = IndexMap::new();
                m.insert("RecordTypeEnum".into(), Node::Str("ObjectNullMultiple".into()));
                m.insert("NullCount".into(), Node::Int(null_count));
                Ok(Node::Map(m))
            }
            // Recognised by the wire format but outside this decoder's
            // implemented subset (spec.md section 4.4's explicit scope cut).
            RecordType::MemberPrimitiveTyped
            | RecordType::ArraySinglePrimitive
            | RecordType::ArraySingleObject
            | RecordType::ArraySingleString
            | RecordType::ArrayOfType
            | RecordType::BinaryMethodCall
            | RecordType::BinaryMethodReturn => {
                Err(Error::UnsupportedRecord { record_type: record_type.name(), code: tag })
            }
        }
    }

    fn decode_class_record(&mut self, record_type: RecordType, path: &RecordPath) -> Result<Node> {
        let class_info = self.read_class_info()?;
        let has_types = matches!(
            record_type,
            RecordType::SystemClassWithMembersAndTypes | RecordType::ClassWithMembersAndTypes
        );
        let is_system = matches!(
            record_type,
            RecordType::SystemClassWithMembers | RecordType::SystemClassWithMembersAndTypes
        );

        let member_type_info = if has_types {
            Some(self.read_member_type_info(class_info.member_names.len() as i32)?)
        } else {
            None
        };
        let library_id = if !is_system { Some(self.read_i32("LibraryId")?) } else { None };

        self.metadata_registry.insert(
            class_info.object_id,
            ClassMeta {
                class_info: class_info.clone(),
                member_type_info: member_type_info.clone(),
                library_id,
            },
        );

        let mut fields = IndexMap::new();
        fields.insert("RecordTypeEnum".into(), Node::Str(record_type.name().into()));
        fields.insert("ObjectId".into(), Node::Int(class_info.object_id as i64));
        fields.insert("ClassInfo".into(), class_info_to_node(&class_info));
        if let Some(mti) = &member_type_info {
            fields.insert("MemberTypeInfo".into(), member_type_info_to_node(mti));
        }
        if let Some(lib) = library_id {
            fields.insert("LibraryId".into(), Node::Int(lib as i64));
        }

        // Codes 2/3 (no type info) register their class metadata but never
        // decode member values, matching the member-value scope of this format.
        let values = if has_types {
            Some(self.read_member_values_dynamic(&class_info, member_type_info.as_ref(), path)?)
        } else {
            None
        };

        let snapshot = fields.clone();
        self.register_object(class_info.object_id, Node::Map(snapshot), values.clone().map(Node::Seq))?;

        if let Some(values) = values {
            fields.insert("Values".into(), Node::Seq(values));
        }

        Ok(Node::Map(fields))
    }

    fn decode_class_with_id(&mut self, path: &RecordPath) -> Result<Node> {
        let object_id = self.read_i32("ObjectId")?;
        let metadata_id = self.read_i32("MetadataId")?;
        let meta = self
            .metadata_registry
            .get(&metadata_id)
            .cloned()
            .ok_or(Error::MissingMetadata { metadata_id, offset: self.offset })?;

        let mut fields = IndexMap::new();
        fields.insert("RecordTypeEnum".into(), Node::Str("ClassWithId".into()));
        fields.insert("ObjectId".into(), Node::Int(object_id as i64));
        fields.insert("MetadataId".into(), Node::Int(metadata_id as i64));
        if self.options.expand {
            fields.insert("ClassInfo".into(), class_info_to_node(&meta.class_info));
            if let Some(mti) = &meta.member_type_info {
                fields.insert("MemberTypeInfo".into(), member_type_info_to_node(mti));
            }
            if let Some(lib) = meta.library_id {
                fields.insert("LibraryId".into(), Node::Int(lib as i64));
            }
        }

        let values =
            self.read_member_values_dynamic(&meta.class_info, meta.member_type_info.as_ref(), path)?;

        let snapshot = fields.clone();
        self.register_object(object_id, Node::Map(snapshot), Some(Node::Seq(values.clone())))?;

        fields.insert("Values".into(), Node::Seq(values));
        Ok(Node::Map(fields))
    }

    fn decode_binary_array(&mut self, path: &RecordPath) -> Result<Node> {
        let object_id = self.read_i32("ObjectId")?;
        let array_type = BinaryArrayType::try_from(self.read_u8("BinaryArrayTypeEnum")?)?;
        let rank = self.read_i32("Rank")?;
        let mut lengths = Vec::with_capacity(rank.max(0) as usize);
        for _ in 0..rank.max(0) {
            lengths.push(self.read_i32("Lengths")?);
        }
        let lower_bounds = if array_type.has_bounds() {
            let mut bounds = Vec::with_capacity(rank.max(0) as usize);
            for _ in 0..rank.max(0) {
                bounds.push(self.read_i32("LowerBounds")?);
            }
            Some(bounds)
        } else {
            None
        };

        if array_type != BinaryArrayType::Single {
            return Err(Error::UnsupportedArrayShape { shape: array_type.name() });
        }

        let binary_type = BinaryType::try_from(self.read_u8("TypeEnum")?)?;
        let additional_info = self.read_additional_type_info(binary_type)?;

        let mut fields = IndexMap::new();
        fields.insert("RecordTypeEnum".into(), Node::Str("BinaryArray".into()));
        fields.insert("ObjectId".into(), Node::Int(object_id as i64));
        fields.insert("BinaryArrayTypeEnum".into(), Node::Str(array_type.name().into()));
        fields.insert("Rank".into(), Node::Int(rank as i64));
        fields.insert(
            "Lengths".into(),
            Node::Seq(lengths.iter().map(|l| Node::Int(*l as i64)).collect()),
        );
        fields.insert(
            "LowerBounds".into(),
            match &lower_bounds {
                Some(b) => Node::Seq(b.iter().map(|l| Node::Int(*l as i64)).collect()),
                None => Node::Null,
            },
        );
        fields.insert("TypeEnum".into(), Node::Str(binary_type.name().into()));
        fields.insert("AdditionalTypeInfo".into(), additional_info_to_node(&additional_info));

        let total: i64 = lengths.iter().map(|&l| l as i64).product();
        let total = i32::try_from(total).map_err(|_| Error::ArrayOverrun)?;

        let values = self.read_array_elements(total, binary_type, &additional_info, path)?;

        let snapshot = fields.clone();
        self.register_object(object_id, Node::Map(snapshot), Some(Node::Seq(values.clone())))?;

        fields.insert("Values".into(), Node::Seq(values));
        Ok(Node::Map(fields))
    }

    fn read_member_values_dynamic(
        &mut self,
        class_info: &ClassInfo,
        mti: Option<&MemberTypeInfo>,
        path: &RecordPath,
    ) -> Result<Vec<Node>> {
        let mut values = Vec::with_capacity(class_info.member_names.len());
        for i in 0..class_info.member_names.len() {
            let mut child_path = path.clone();
            child_path.steps.push(PathStep::Values(values.len()));
            let value = match mti {
                Some(m) => self.read_member_value(Some(m.binary_types[i]), Some(&m.additional_infos[i]), &child_path)?,
                // No type info on record: the member is itself a fully
                // self-describing tagged record.
                None => self.decode_next_nested(&child_path)?,
            };
            if let Some(id_ref) = member_reference_id(&value) {
                self.reference_list.push((id_ref, child_path));
            }
            values.push(value);
        }
        Ok(values)
    }

    fn read_member_value(
        &mut self,
        bt: Option<BinaryType>,
        ai: Option<&AdditionalTypeInfo>,
        path: &RecordPath,
    ) -> Result<Node> {
        match bt {
            Some(BinaryType::Primitive) => match ai {
                Some(AdditionalTypeInfo::Primitive(pt)) => self.read_primitive_value(*pt),
                _ => Err(Error::UnsupportedConstruct { what: "primitive member without type info" }),
            },
            _ => self.decode_next_nested(path),
        }
    }

    fn read_array_elements(
        &mut self,
        count: i32,
        bt: BinaryType,
        ai: &AdditionalTypeInfo,
        path: &RecordPath,
    ) -> Result<Vec<Node>> {
        let mut values = Vec::new();
        let mut filled: i32 = 0;
        while filled < count {
            let mut child_path = path.clone();
            child_path.steps.push(PathStep::Values(values.len()));
            let node = match bt {
                BinaryType::Primitive => match ai {
                    AdditionalTypeInfo::Primitive(pt) => self.read_primitive_value(*pt)?,
                    _ => return Err(Error::UnsupportedConstruct { what: "primitive array without type info" }),
                },
                _ => self.decode_next_nested(&child_path)?,
            };
            match node.record_type_name() {
                Some("ObjectNullMultiple") | Some("ObjectNullMultiple256") => {
                    let run = node.get("NullCount").and_then(Node::as_int).unwrap_or(0);
                    if filled + (run as i32) > count {
                        return Err(Error::ArrayOverrun);
                    }
                    values.push(Node::Null);
                    filled += run as i32;
                    continue;
                }
                Some("ObjectNull") => {
                    values.push(Node::Null);
                }
                _ => {
                    if let Some(id_ref) = member_reference_id(&node) {
                        self.reference_list.push((id_ref, child_path));
                    }
                    values.push(node);
                }
            }
            filled += 1;
        }
        Ok(values)
    }

    fn register_object(&mut self, object_id: i32, snapshot: Node, values: Option<Node>) -> Result<()> {
        if self.object_table.contains_key(&object_id) && !self.options.best_effort {
            return Err(Error::DuplicateObjectId { object_id });
        }
        self.object_table.insert(object_id, snapshot);
        if let Some(v) = values {
            self.value_table.insert(object_id, v);
        }
        Ok(())
    }

    fn read_class_info(&mut self) -> Result<ClassInfo> {
        let object_id = self.read_i32("ObjectId")?;
        let name = self.read_length_prefixed_string()?;
        let member_count = self.read_i32("MemberCount")?;
        let mut member_names = Vec::with_capacity(member_count.max(0) as usize);
        for _ in 0..member_count.max(0) {
            member_names.push(self.read_length_prefixed_string()?);
        }
        Ok(ClassInfo { object_id, name, member_names })
    }

    fn read_member_type_info(&mut self, count: i32) -> Result<MemberTypeInfo> {
        let mut binary_types = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count.max(0) {
            binary_types.push(BinaryType::try_from(self.read_u8("BinaryTypeEnum")?)?);
        }
        let mut additional_infos = Vec::with_capacity(count.max(0) as usize);
        for bt in &binary_types {
            additional_infos.push(self.read_additional_type_info(*bt)?);
        }
        Ok(MemberTypeInfo { binary_types, additional_infos })
    }

    fn read_additional_type_info(&mut self, bt: BinaryType) -> Result<AdditionalTypeInfo> {
        Ok(match bt {
            BinaryType::Primitive => {
                AdditionalTypeInfo::Primitive(PrimitiveType::try_from(self.read_u8("PrimitiveTypeEnum")?)?)
            }
            BinaryType::SystemClass => AdditionalTypeInfo::SystemClass(self.read_length_prefixed_string()?),
            BinaryType::Class => AdditionalTypeInfo::Class(ClassTypeInfo {
                type_name: self.read_length_prefixed_string()?,
                library_id: self.read_i32("LibraryId")?,
            }),
            _ => AdditionalTypeInfo::None,
        })
    }

    fn read_primitive_value(&mut self, pt: PrimitiveType) -> Result<Node> {
        Ok(match pt {
            PrimitiveType::Boolean => Node::Bool(self.read_u8("Boolean")? != 0),
            PrimitiveType::Byte => Node::Int(self.read_u8("Byte")? as i64),
            PrimitiveType::Char => return Err(Error::UnsupportedConstruct { what: "Char" }),
            PrimitiveType::Decimal => {
                let s = self.read_length_prefixed_string()?;
                validate_decimal(&s)?;
                Node::Str(s)
            }
            PrimitiveType::Double => Node::Float(self.read_f64("Double")?),
            PrimitiveType::Int16 => Node::Int(self.read_i16("Int16")? as i64),
            PrimitiveType::Int32 => Node::Int(self.read_i32("Int32")? as i64),
            PrimitiveType::Int64 => Node::Int(self.read_i64("Int64")?),
            PrimitiveType::SByte => Node::Int(self.read_u8("SByte")? as i8 as i64),
            PrimitiveType::Single => Node::Float(self.read_f32("Single")? as f64),
            PrimitiveType::TimeSpan => Node::Int(self.read_i64("TimeSpan")?),
            PrimitiveType::DateTime => self.read_date_time()?,
            PrimitiveType::UInt16 => Node::Int(self.read_u16("UInt16")? as i64),
            PrimitiveType::UInt32 => Node::Int(self.read_u32("UInt32")? as i64),
            PrimitiveType::UInt64 => Node::Int(self.read_u64("UInt64")? as i64),
            PrimitiveType::String => Node::Str(self.read_length_prefixed_string()?),
            PrimitiveType::Null => Node::Null,
        })
    }

    fn read_date_time(&mut self) -> Result<Node> {
        let raw = self.read_u64("DateTime")?;
        let kind = if raw & 0x01 != 0 {
            Node::Str("UTC".into())
        } else if raw & 0x02 != 0 {
            Node::Str("Local".into())
        } else {
            Node::Null
        };
        let ticks = (raw & !0x3u64) as i64;
        let mut m = IndexMap::new();
        m.insert("Kind".into(), kind);
        m.insert("ticks".into(), Node::Int(ticks));
        Ok(Node::Map(m))
    }

    fn read_length_prefixed_string(&mut self) -> Result<String> {
        let length = self.read_variable_length_int()?;
        if length < 0 {
            return Err(Error::StringLengthOverflow);
        }
        if length == 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u8; length as usize];
        self.read_exact_ctx(&mut buf, "string bytes")?;
        Ok(String::from_utf8(buf)?)
    }

    /// 7-bits-per-byte, high bit signals continuation, bounded at 5 bytes
    /// (enough for a 32-bit length; a longer run is treated as malformed).
    fn read_variable_length_int(&mut self) -> Result<i32> {
        let mut value: i32 = 0;
        let mut shift = 0u32;
        for _ in 0..5 {
            let b = self.read_u8("string length")?;
            value |= ((b & 0x7F) as i32) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(Error::StringLengthOverflow)
    }

    fn read_exact_ctx(&mut self, buf: &mut [u8], context: &'static str) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::UnexpectedEndOfStream { context })
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(buf[0])
    }

    fn read_i16(&mut self, context: &'static str) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_i32(&mut self, context: &'static str) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i64(&mut self, context: &'static str) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_u64(&mut self, context: &'static str) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32(&mut self, context: &'static str) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_f64(&mut self, context: &'static str) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact_ctx(&mut buf, context)?;
        Ok(f64::from_le_bytes(buf))
    }
}

fn class_info_to_node(ci: &ClassInfo) -> Node {
    let mut m = IndexMap::new();
    m.insert("ObjectId".into(), Node::Int(ci.object_id as i64));
    m.insert("Name".into(), Node::Str(ci.name.clone()));
    m.insert(
        "MemberNames".into(),
        Node::Seq(ci.member_names.iter().cloned().map(Node::Str).collect()),
    );
    Node::Map(m)
}

fn member_type_info_to_node(mti: &MemberTypeInfo) -> Node {
    let items = mti
        .binary_types
        .iter()
        .zip(mti.additional_infos.iter())
        .map(|(bt, ai)| {
            let mut m = IndexMap::new();
            m.insert("BinaryType".into(), Node::Str(bt.name().into()));
            m.insert("AdditionalTypeInfo".into(), additional_info_to_node(ai));
            Node::Map(m)
        })
        .collect();
    Node::Seq(items)
}

fn additional_info_to_node(info: &AdditionalTypeInfo) -> Node {
    match info {
        AdditionalTypeInfo::Primitive(pt) => Node::Str(pt.name().into()),
        AdditionalTypeInfo::SystemClass(name) => Node::Str(name.clone()),
        AdditionalTypeInfo::Class(ct) => {
            let mut m = IndexMap::new();
            m.insert("TypeName".into(), Node::Str(ct.type_name.clone()));
            m.insert("LibraryId".into(), Node::Int(ct.library_id as i64));
            Node::Map(m)
        }
        AdditionalTypeInfo::None => Node::Null,
    }
}

/// Validates the textual form NRBF uses for `Decimal`: an optional sign,
/// at least one integer digit, and an optional fractional part.
fn validate_decimal(s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && bytes[i] == b'-' {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == int_start {
        return Err(Error::MalformedDecimal(s.to_string()));
    }
    if i < bytes.len() {
        if bytes[i] != b'.' {
            return Err(Error::MalformedDecimal(s.to_string()));
        }
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == frac_start {
            return Err(Error::MalformedDecimal(s.to_string()));
        }
    }
    if i != bytes.len() {
        return Err(Error::MalformedDecimal(s.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(mut v: u32) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut b = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                b |= 0x80;
            }
            out.push(b);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn length_prefixed(s: &str) -> Vec<u8> {
        let mut out = varint(s.len() as u32);
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn decodes_minimal_header_and_message_end() {
        let mut bytes = vec![0u8]; // SerializedStreamHeader
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(11); // MessageEnd

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].record_type_name(), Some("SerializedStreamHeader"));
        assert_eq!(decoded.records[0].get("RootId").and_then(Node::as_int), Some(1));
        assert_eq!(decoded.records[1].record_type_name(), Some("MessageEnd"));
    }

    #[test]
    fn decodes_binary_object_string() {
        let mut bytes = vec![6u8]; // BinaryObjectString
        bytes.extend_from_slice(&5i32.to_le_bytes());
        bytes.extend_from_slice(&length_prefixed("hello"));

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        assert_eq!(decoded.records[0].get("Value").and_then(Node::as_str), Some("hello"));
    }

    #[test]
    fn rejects_unknown_record_type() {
        let bytes = vec![250u8];
        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(err, Error::UnknownEnumValue { kind: "RecordType", value: 250 }));
    }

    #[test]
    fn best_effort_returns_partial_records_on_error() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        // truncated: MinorVersion is missing

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions { best_effort: true, expand: false });
        let decoded = decoder.parse().unwrap();
        assert!(decoded.records.is_empty());
    }

    #[test]
    fn array_null_run_collapses_to_one_entry() {
        let mut bytes = vec![7u8]; // BinaryArray
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        bytes.push(0); // BinaryArrayTypeEnum::Single
        bytes.extend_from_slice(&1i32.to_le_bytes()); // Rank
        bytes.extend_from_slice(&3i32.to_le_bytes()); // Lengths[0]
        bytes.push(2); // BinaryType::Object
        bytes.push(13); // ObjectNullMultiple256
        bytes.push(3); // NullCount

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        let values = decoded.records[0].get("Values").and_then(Node::as_seq).unwrap();
        assert_eq!(values.len(), 1);
        assert!(values[0].is_null());
    }

    #[test]
    fn unsupported_record_codes_report_their_name() {
        let bytes = vec![8u8]; // MemberPrimitiveTyped
        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedRecord { record_type: "MemberPrimitiveTyped", code: 8 }
        ));
    }

    #[test]
    fn non_single_array_shape_is_rejected() {
        let mut bytes = vec![7u8]; // BinaryArray
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        bytes.push(1); // BinaryArrayTypeEnum::Jagged
        bytes.extend_from_slice(&1i32.to_le_bytes()); // Rank
        bytes.extend_from_slice(&2i32.to_le_bytes()); // Lengths[0]

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(err, Error::UnsupportedArrayShape { shape: "Jagged" }));
    }

    #[test]
    fn expand_merges_full_metadata_snapshot_into_class_with_id() {
        let mut bytes = vec![5u8]; // ClassWithMembersAndTypes, ObjectId 1
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&length_prefixed("Widget"));
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
        bytes.extend_from_slice(&length_prefixed("Name"));
        bytes.push(0); // BinaryType::Primitive
        bytes.push(18); // PrimitiveType::String
        bytes.extend_from_slice(&7i32.to_le_bytes()); // LibraryId
        bytes.extend_from_slice(&length_prefixed("bob"));

        bytes.push(1); // ClassWithId
        bytes.extend_from_slice(&2i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MetadataId
        bytes.extend_from_slice(&length_prefixed("alice"));

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions { best_effort: false, expand: true });
        let decoded = decoder.parse().unwrap();
        let class_with_id = &decoded.records[1];
        assert_eq!(class_with_id.get("ClassInfo").and_then(|c| c.get("Name")).and_then(Node::as_str), Some("Widget"));
        let mti = class_with_id.get("MemberTypeInfo").and_then(Node::as_seq).unwrap();
        assert_eq!(mti[0].get("BinaryType").and_then(Node::as_str), Some("Primitive"));
        assert_eq!(class_with_id.get("LibraryId").and_then(Node::as_int), Some(7));
    }

    #[test]
    fn date_time_kind_tag_is_decoded_by_name() {
        fn decode_date_time(raw: u64) -> Node {
            let mut bytes = vec![5u8]; // ClassWithMembersAndTypes
            bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
            bytes.extend_from_slice(&length_prefixed("Event"));
            bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
            bytes.extend_from_slice(&length_prefixed("When"));
            bytes.push(0); // BinaryType::Primitive
            bytes.push(13); // PrimitiveType::DateTime
            bytes.extend_from_slice(&1i32.to_le_bytes()); // LibraryId
            bytes.extend_from_slice(&raw.to_le_bytes());

            let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
            let decoded = decoder.parse().unwrap();
            decoded.records[0].get("Values").and_then(Node::as_seq).unwrap()[0].clone()
        }

        let utc = decode_date_time(0x21); // bit0 set
        assert_eq!(utc.get("Kind").and_then(Node::as_str), Some("UTC"));
        assert_eq!(utc.get("ticks").and_then(Node::as_int), Some(0x20));

        let local = decode_date_time(0x22); // bit1 set, bit0 clear
        assert_eq!(local.get("Kind").and_then(Node::as_str), Some("Local"));
        assert_eq!(local.get("ticks").and_then(Node::as_int), Some(0x20));

        let unspecified = decode_date_time(0x20); // neither bit set
        assert!(unspecified.get("Kind").unwrap().is_null());
        assert_eq!(unspecified.get("ticks").and_then(Node::as_int), Some(0x20));
    }

    #[test]
    fn missing_metadata_fails_in_strict_mode() {
        let mut bytes = vec![1u8]; // ClassWithId
        bytes.extend_from_slice(&5i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&99i32.to_le_bytes()); // MetadataId, never registered

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(err, Error::MissingMetadata { metadata_id: 99, .. }));
    }

    #[test]
    fn missing_metadata_stops_cleanly_in_best_effort_mode() {
        let mut bytes = vec![0u8]; // SerializedStreamHeader, decodes fine first
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(1); // ClassWithId
        bytes.extend_from_slice(&5i32.to_le_bytes());
        bytes.extend_from_slice(&99i32.to_le_bytes()); // MetadataId, never registered

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions { best_effort: true, expand: false });
        let decoded = decoder.parse().unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].record_type_name(), Some("SerializedStreamHeader"));
    }

    #[test]
    fn rejects_malformed_decimal() {
        assert!(validate_decimal("12.5").is_ok());
        assert!(validate_decimal("-3").is_ok());
        assert!(validate_decimal("abc").is_err());
        assert!(validate_decimal("1.").is_err());
        assert!(validate_decimal(".5").is_err());
    }

    #[test]
    fn string_length_prefix_longer_than_five_continuations_is_rejected() {
        let mut bytes = vec![6u8]; // BinaryObjectString
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        // Six continuation bytes (high bit set on all of them) with no terminator.
        bytes.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(err, Error::StringLengthOverflow));
    }

    #[test]
    fn decimal_member_round_trips_through_decode() {
        let mut bytes = vec![5u8]; // ClassWithMembersAndTypes
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&length_prefixed("Money"));
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
        bytes.extend_from_slice(&length_prefixed("Amount"));
        bytes.push(0); // BinaryType::Primitive
        bytes.push(5); // PrimitiveType::Decimal
        bytes.extend_from_slice(&1i32.to_le_bytes()); // LibraryId
        bytes.extend_from_slice(&length_prefixed("12.345"));

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        let values = decoded.records[0].get("Values").and_then(Node::as_seq).unwrap();
        assert_eq!(values[0].as_str(), Some("12.345"));
    }

    #[test]
    fn malformed_decimal_member_fails_during_decode() {
        let mut bytes = vec![5u8]; // ClassWithMembersAndTypes
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&length_prefixed("Money"));
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
        bytes.extend_from_slice(&length_prefixed("Amount"));
        bytes.push(0); // BinaryType::Primitive
        bytes.push(5); // PrimitiveType::Decimal
        bytes.extend_from_slice(&1i32.to_le_bytes()); // LibraryId
        bytes.extend_from_slice(&length_prefixed("12."));

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let err = decoder.parse().unwrap_err();
        assert!(matches!(err, Error::MalformedDecimal(s) if s == "12."));
    }
}
