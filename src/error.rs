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

use std::io;
use thiserror::Error;

/// Result type for NRBF decoding.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of stream while reading {context}")]
    UnexpectedEndOfStream { context: &'static str },

    #[error("unknown {kind} enum value: {value}")]
    UnknownEnumValue { kind: &'static str, value: u8 },

    #[error(
        "record type {record_type} (0x{code:02x}) is recognised but not supported by this decoder"
    )]
    UnsupportedRecord { record_type: &'static str, code: u8 },

    #[error("unsupported construct: {what}")]
    UnsupportedConstruct { what: &'static str },

    #[error("unsupported array shape: {shape}")]
    UnsupportedArrayShape { shape: &'static str },

    #[error("invalid UTF-8 in string field: {0}")]
    MalformedString(#[from] std::string::FromUtf8Error),

    #[error("malformed decimal text: {0:?}")]
    MalformedDecimal(String),

    #[error("length-prefixed string exceeds the 5-continuation-byte bound")]
    StringLengthOverflow,

    #[error("ClassWithId at offset {offset} references unknown MetadataId {metadata_id}")]
    MissingMetadata { metadata_id: i32, offset: usize },

    #[error("duplicate ObjectId {object_id} registered")]
    DuplicateObjectId { object_id: i32 },

    #[error("run-length null count would overrun the declared array length")]
    ArrayOverrun,

    #[error("recursion limit ({limit}) exceeded while decoding nested records")]
    RecursionLimit { limit: usize },
}
