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

//! Wire-format enumerations and decode-time scratch types. These feed the
//! decoder; the values it produces are expressed as [`crate::node::Node`],
//! not as these types.

use crate::error::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    SerializedStreamHeader = 0,
    ClassWithId = 1,
    SystemClassWithMembers = 2,
    ClassWithMembers = 3,
    SystemClassWithMembersAndTypes = 4,
    ClassWithMembersAndTypes = 5,
    BinaryObjectString = 6,
    BinaryArray = 7,
    MemberPrimitiveTyped = 8,
    MemberReference = 9,
    ObjectNull = 10,
    MessageEnd = 11,
    BinaryLibrary = 12,
    ObjectNullMultiple256 = 13,
    ObjectNullMultiple = 14,
    ArraySinglePrimitive = 15,
    ArraySingleObject = 16,
    ArraySingleString = 17,
    ArrayOfType = 20,
    BinaryMethodCall = 21,
    BinaryMethodReturn = 22,
}

impl RecordType {
    pub fn name(self) -> &'static str {
        match self {
            RecordType::SerializedStreamHeader => "SerializedStreamHeader",
            RecordType::ClassWithId => "ClassWithId",
            RecordType::SystemClassWithMembers => "SystemClassWithMembers",
            RecordType::ClassWithMembers => "ClassWithMembers",
            RecordType::SystemClassWithMembersAndTypes => "SystemClassWithMembersAndTypes",
            RecordType::ClassWithMembersAndTypes => "ClassWithMembersAndTypes",
            RecordType::BinaryObjectString => "BinaryObjectString",
            RecordType::BinaryArray => "BinaryArray",
            RecordType::MemberPrimitiveTyped => "MemberPrimitiveTyped",
            RecordType::MemberReference => "MemberReference",
            RecordType::ObjectNull => "ObjectNull",
            RecordType::MessageEnd => "MessageEnd",
            RecordType::BinaryLibrary => "BinaryLibrary",
            RecordType::ObjectNullMultiple256 => "ObjectNullMultiple256",
            RecordType::ObjectNullMultiple => "ObjectNullMultiple",
            RecordType::ArraySinglePrimitive => "ArraySinglePrimitive",
            RecordType::ArraySingleObject => "ArraySingleObject",
            RecordType::ArraySingleString => "ArraySingleString",
            RecordType::ArrayOfType => "ArrayOfType",
            RecordType::BinaryMethodCall => "BinaryMethodCall",
            RecordType::BinaryMethodReturn => "BinaryMethodReturn",
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(RecordType::SerializedStreamHeader),
            1 => Ok(RecordType::ClassWithId),
            2 => Ok(RecordType::SystemClassWithMembers),
            3 => Ok(RecordType::ClassWithMembers),
            4 => Ok(RecordType::SystemClassWithMembersAndTypes),
            5 => Ok(RecordType::ClassWithMembersAndTypes),
            6 => Ok(RecordType::BinaryObjectString),
            7 => Ok(RecordType::BinaryArray),
            8 => Ok(RecordType::MemberPrimitiveTyped),
            9 => Ok(RecordType::MemberReference),
            10 => Ok(RecordType::ObjectNull),
            11 => Ok(RecordType::MessageEnd),
            12 => Ok(RecordType::BinaryLibrary),
            13 => Ok(RecordType::ObjectNullMultiple256),
            14 => Ok(RecordType::ObjectNullMultiple),
            15 => Ok(RecordType::ArraySinglePrimitive),
            16 => Ok(RecordType::ArraySingleObject),
            17 => Ok(RecordType::ArraySingleString),
            20 => Ok(RecordType::ArrayOfType),
            21 => Ok(RecordType::BinaryMethodCall),
            22 => Ok(RecordType::BinaryMethodReturn),
            _ => Err(Error::UnknownEnumValue { kind: "RecordType", value }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryType {
    Primitive = 0,
    String = 1,
    Object = 2,
    SystemClass = 3,
    Class = 4,
    ObjectArray = 5,
    StringArray = 6,
    PrimitiveArray = 7,
}

impl BinaryType {
    pub fn name(self) -> &'static str {
        match self {
            BinaryType::Primitive => "Primitive",
            BinaryType::String => "String",
            BinaryType::Object => "Object",
            BinaryType::SystemClass => "SystemClass",
            BinaryType::Class => "Class",
            BinaryType::ObjectArray => "ObjectArray",
            BinaryType::StringArray => "StringArray",
            BinaryType::PrimitiveArray => "PrimitiveArray",
        }
    }
}

impl TryFrom<u8> for BinaryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(BinaryType::Primitive),
            1 => Ok(BinaryType::String),
            2 => Ok(BinaryType::Object),
            3 => Ok(BinaryType::SystemClass),
            4 => Ok(BinaryType::Class),
            5 => Ok(BinaryType::ObjectArray),
            6 => Ok(BinaryType::StringArray),
            7 => Ok(BinaryType::PrimitiveArray),
            _ => Err(Error::UnknownEnumValue { kind: "BinaryType", value }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean = 1,
    Byte = 2,
    Char = 3,
    Decimal = 5,
    Double = 6,
    Int16 = 7,
    Int32 = 8,
    Int64 = 9,
    SByte = 10,
    Single = 11,
    TimeSpan = 12,
    DateTime = 13,
    UInt16 = 14,
    UInt32 = 15,
    UInt64 = 16,
    Null = 17,
    String = 18,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Byte => "Byte",
            PrimitiveType::Char => "Char",
            PrimitiveType::Decimal => "Decimal",
            PrimitiveType::Double => "Double",
            PrimitiveType::Int16 => "Int16",
            PrimitiveType::Int32 => "Int32",
            PrimitiveType::Int64 => "Int64",
            PrimitiveType::SByte => "SByte",
            PrimitiveType::Single => "Single",
            PrimitiveType::TimeSpan => "TimeSpan",
            PrimitiveType::DateTime => "DateTime",
            PrimitiveType::UInt16 => "UInt16",
            PrimitiveType::UInt32 => "UInt32",
            PrimitiveType::UInt64 => "UInt64",
            PrimitiveType::Null => "Null",
            PrimitiveType::String => "String",
        }
    }
}

impl TryFrom<u8> for PrimitiveType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(PrimitiveType::Boolean),
            2 => Ok(PrimitiveType::Byte),
            3 => Ok(PrimitiveType::Char),
            5 => Ok(PrimitiveType::Decimal),
            6 => Ok(PrimitiveType::Double),
            7 => Ok(PrimitiveType::Int16),
            8 => Ok(PrimitiveType::Int32),
            9 => Ok(PrimitiveType::Int64),
            10 => Ok(PrimitiveType::SByte),
            11 => Ok(PrimitiveType::Single),
            12 => Ok(PrimitiveType::TimeSpan),
            13 => Ok(PrimitiveType::DateTime),
            14 => Ok(PrimitiveType::UInt16),
            15 => Ok(PrimitiveType::UInt32),
            16 => Ok(PrimitiveType::UInt64),
            17 => Ok(PrimitiveType::Null),
            18 => Ok(PrimitiveType::String),
            _ => Err(Error::UnknownEnumValue { kind: "PrimitiveType", value }),
        }
    }
}

/// `BinaryArrayTypeEnumeration`. Only `Single` shapes are decoded; the
/// others are recognised so a proper `UnsupportedArrayShape` can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryArrayType {
    Single = 0,
    Jagged = 1,
    Rectangular = 2,
    SingleOffset = 3,
    JaggedOffset = 4,
    RectangularOffset = 5,
}

impl BinaryArrayType {
    pub fn name(self) -> &'static str {
        match self {
            BinaryArrayType::Single => "Single",
            BinaryArrayType::Jagged => "Jagged",
            BinaryArrayType::Rectangular => "Rectangular",
            BinaryArrayType::SingleOffset => "SingleOffset",
            BinaryArrayType::JaggedOffset => "JaggedOffset",
            BinaryArrayType::RectangularOffset => "RectangularOffset",
        }
    }

    /// Mirrors the original `has_bounds()`: true for every shape whose name
    /// carries an explicit lower-bound offset.
    pub fn has_bounds(self) -> bool {
        matches!(
            self,
            BinaryArrayType::SingleOffset
                | BinaryArrayType::JaggedOffset
                | BinaryArrayType::RectangularOffset
        )
    }
}

impl TryFrom<u8> for BinaryArrayType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(BinaryArrayType::Single),
            1 => Ok(BinaryArrayType::Jagged),
            2 => Ok(BinaryArrayType::Rectangular),
            3 => Ok(BinaryArrayType::SingleOffset),
            4 => Ok(BinaryArrayType::JaggedOffset),
            5 => Ok(BinaryArrayType::RectangularOffset),
            _ => Err(Error::UnknownEnumValue { kind: "BinaryArrayType", value }),
        }
    }
}

/// `ClassInfo`: the object id, type name, and ordered member names shared
/// by every `*ClassWithMembers*` record.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub object_id: i32,
    pub name: String,
    pub member_names: Vec<String>,
}

/// Per-member type tags read in a first pass, with their associated
/// additional info read in a second pass once all tags are known.
#[derive(Debug, Clone)]
pub struct MemberTypeInfo {
    pub binary_types: Vec<BinaryType>,
    pub additional_infos: Vec<AdditionalTypeInfo>,
}

#[derive(Debug, Clone)]
pub enum AdditionalTypeInfo {
    Primitive(PrimitiveType),
    SystemClass(String),
    Class(ClassTypeInfo),
    None,
}

#[derive(Debug, Clone)]
pub struct ClassTypeInfo {
    pub type_name: String,
    pub library_id: i32,
}
