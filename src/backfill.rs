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

use crate::decoder::{get_node_mut, Decoded};
use crate::node::Node;
use std::collections::HashSet;

impl Decoded {
    /// Resolves every `MemberReference` placeholder by overlaying the
    /// fields of its target object onto it in place, then (if `prune`)
    /// removes the now-redundant top-level record the reference pointed
    /// to. Resolution and pruning run as two separate passes: pruning
    /// mid-resolution would shift top-level indices still pending use.
    pub fn backfill(&mut self, prune: bool) {
        for (id_ref, path) in &self.reference_list {
            let Some(target) = self.object_table.get(id_ref).cloned() else {
                log::warn!("unresolved MemberReference IdRef {id_ref}, skipping");
                continue;
            };
            let Some(node) = get_node_mut(&mut self.records, path) else {
                continue;
            };
            if let (Some(target_fields), Some(fields)) = (target.as_map(), node.as_map_mut()) {
                for (k, v) in target_fields {
                    if k == "RecordTypeEnum" || k == "IdRef" {
                        continue;
                    }
                    fields.insert(k.clone(), v.clone());
                }
            }
            if let Some(values) = self.value_table.get(id_ref).cloned() {
                if let Some(fields) = node.as_map_mut() {
                    fields.insert("Values".to_string(), values);
                }
            }
        }

        if !prune {
            return;
        }

        let mut pruned = HashSet::new();
        for (id_ref, _) in &self.reference_list {
            if !pruned.insert(*id_ref) {
                continue;
            }
            if let Some(index) = find_record_index(&self.records, *id_ref) {
                self.records.remove(index);
            }
        }
    }
}

fn find_record_index(records: &[Node], id: i32) -> Option<usize> {
    records.iter().position(|r| r.identity() == Some(id))
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

    /// A BinaryObjectString (ObjectId 1, "hi") followed by a
    /// ClassWithMembersAndTypes (ObjectId 3) with one `String` member whose
    /// sole value is a MemberReference back to ObjectId 1 — this drives the
    /// reference through the real decode path so `reference_list` is
    /// populated exactly as live decoding would populate it.
    fn reference_sample() -> Vec<u8> {
        let mut bytes = vec![6u8]; // BinaryObjectString
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&length_prefixed("hi"));
        bytes.push(5); // ClassWithMembersAndTypes
        bytes.extend_from_slice(&3i32.to_le_bytes()); // ObjectId
        bytes.extend_from_slice(&length_prefixed("Ref"));
        bytes.extend_from_slice(&1i32.to_le_bytes()); // MemberCount
        bytes.extend_from_slice(&length_prefixed("Target"));
        bytes.push(1); // BinaryType::String
        bytes.extend_from_slice(&7i32.to_le_bytes()); // LibraryId
        bytes.push(9); // MemberReference
        bytes.extend_from_slice(&1i32.to_le_bytes()); // IdRef
        bytes
    }

    #[test]
    fn backfill_overlays_target_fields_onto_reference() {
        let bytes = reference_sample();
        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let mut decoded = decoder.parse().unwrap();
        decoded.backfill(false);
        let values = decoded.records[1].get("Values").and_then(Node::as_seq).unwrap();
        assert_eq!(values[0].get("Value").and_then(Node::as_str), Some("hi"));
        assert_eq!(values[0].record_type_name(), Some("MemberReference"));
    }

    #[test]
    fn backfill_prunes_resolved_target_record() {
        let bytes = reference_sample();
        let decoder = Decoder::new(bytes.as_slice(), DecodeOptions::default());
        let mut decoded = decoder.parse().unwrap();
        decoded.backfill(true);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].record_type_name(), Some("ClassWithMembersAndTypes"));
    }
}
