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

use crate::decoder::Decoded;
use crate::node::Node;
use indexmap::IndexMap;

impl Decoded {
    /// Minifies the decoded forest down to the object graph reachable from
    /// the stream's `RootId`, dropping every bookkeeping field that only
    /// the wire format needed (`RecordTypeEnum`, `ClassInfo`, `MemberTypeInfo`,
    /// and so on). If the root can't be located — an empty or malformed
    /// stream — the header record is returned unchanged rather than
    /// propagating an error, since there is nothing left to minify.
    pub fn crunch(&self) -> Node {
        let Some(header) = self.records.first() else {
            return Node::map();
        };
        let Some(root_id) = header.get("RootId").and_then(Node::as_int) else {
            return header.clone();
        };
        match self.records.iter().find(|r| r.identity() == Some(root_id as i32)) {
            Some(root) => self.crunch_value(root),
            None => header.clone(),
        }
    }

    fn crunch_value(&self, value: &Node) -> Node {
        if value.get("ClassInfo").is_some() || value.get("MetadataId").is_some() {
            return self.crunch_class(value);
        }
        if value.record_type_name() == Some("ObjectNull") {
            return Node::Null;
        }
        if let Some(values) = value.get("Values") {
            return self.crunch_value(values);
        }
        if let Some(inner) = value.get("Value") {
            return self.crunch_value(inner);
        }
        match value {
            Node::Seq(items) => Node::Seq(items.iter().map(|v| self.crunch_value(v)).collect()),
            Node::Map(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    let crunched = self.crunch_value(v);
                    if !matches!(crunched, Node::Null) {
                        out.insert(k.clone(), crunched);
                    }
                }
                Node::Map(out)
            }
            other => other.clone(),
        }
    }

    fn crunch_class(&self, value: &Node) -> Node {
        let class_info = value.get("ClassInfo").or_else(|| {
            value
                .get("MetadataId")
                .and_then(Node::as_int)
                .and_then(|id| self.object_table.get(&(id as i32)))
                .and_then(|o| o.get("ClassInfo"))
        });
        let Some(member_names) = class_info.and_then(|c| c.get("MemberNames")).and_then(Node::as_seq) else {
            return self.crunch_generic(value);
        };
        let values = value.get("Values").and_then(Node::as_seq).unwrap_or(&[]);
        let mut out = IndexMap::new();
        for (name, v) in member_names.iter().zip(values.iter()) {
            let Some(name) = name.as_str() else { continue };
            let crunched = self.crunch_value(v);
            if !matches!(crunched, Node::Null) {
                out.insert(name.to_string(), crunched);
            }
        }
        Node::Map(out)
    }

    fn crunch_generic(&self, value: &Node) -> Node {
        match value.as_map() {
            Some(map) => {
                let mut out = IndexMap::new();
                for (k, v) in map {
                    let crunched = self.crunch_value(v);
                    if !matches!(crunched, Node::Null) {
                        out.insert(k.clone(), crunched);
                    }
                }
                Node::Map(out)
            }
            None => value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeOptions, Decoder};

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
    fn crunch_falls_back_to_header_when_root_unresolvable() {
        let mut bytes = vec![0u8]; // SerializedStreamHeader, RootId = 99 (never defined)
        bytes.extend_from_slice(&99i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(11); // MessageEnd

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        let crunched = decoded.crunch();
        assert_eq!(crunched.record_type_name(), Some("SerializedStreamHeader"));
    }

    #[test]
    fn crunch_resolves_binary_object_string_root() {
        let mut bytes = vec![0u8]; // header, RootId = 2
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());

        bytes.push(6); // BinaryObjectString
        bytes.extend_from_slice(&2i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&length_prefixed("hello"));

        bytes.push(11); // MessageEnd

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        let crunched = decoded.crunch();
        assert_eq!(crunched.as_str(), Some("hello"));
    }

    #[test]
    fn crunch_resolves_class_members_by_name() {
        let mut bytes = vec![0u8]; // header, RootId = 1
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());

        bytes.push(5); // ClassWithMembersAndTypes
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&length_prefixed("Widget"));
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
        bytes.extend_from_slice(&length_prefixed("Name"));
        bytes.push(0); // BinaryType::Primitive
        bytes.push(18); // PrimitiveType::String
        bytes.extend_from_slice(&1i32.to_le_bytes()); // LibraryId
        bytes.extend_from_slice(&length_prefixed("bob"));

        bytes.push(11); // MessageEnd

        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let decoded = decoder.parse().unwrap();
        let crunched = decoded.crunch();
        assert_eq!(crunched.get("Name").and_then(Node::as_str), Some("bob"));
    }
}
