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

use indexmap::IndexMap;

/// The single polymorphic value every decoded record, member value, and
/// crunched result is expressed as. Records are represented as `Node::Map`
/// carrying a `"RecordTypeEnum"` entry naming the variant, the same way
/// every record is just a dict in the reference implementation this was
/// ported from.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Node>),
    Map(IndexMap<String, Node>),
}

impl Node {
    pub fn map() -> Node {
        Node::Map(IndexMap::new())
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Node]> {
        match self {
            Node::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// The record-type tag, for nodes built by the decoder or crunch passes.
    pub fn record_type_name(&self) -> Option<&str> {
        self.get("RecordTypeEnum").and_then(Node::as_str)
    }

    /// Mirrors `record_id()` in the original implementation: a record's
    /// identity is its own `ObjectId`, or failing that its nested
    /// `ClassInfo.ObjectId`, or failing that its nested `ArrayInfo.ObjectId`.
    pub fn identity(&self) -> Option<i32> {
        if let Some(id) = self.get("ObjectId").and_then(Node::as_int) {
            return Some(id as i32);
        }
        if let Some(id) = self
            .get("ClassInfo")
            .and_then(|c| c.get("ObjectId"))
            .and_then(Node::as_int)
        {
            return Some(id as i32);
        }
        if let Some(id) = self
            .get("ArrayInfo")
            .and_then(|c| c.get("ObjectId"))
            .and_then(Node::as_int)
        {
            return Some(id as i32);
        }
        None
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Bool(v)
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Node::Str(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::Str(v.to_string())
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Node::Int(v)
    }
}

impl From<i32> for Node {
    fn from(v: i32) -> Self {
        Node::Int(v as i64)
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Node::Float(v)
    }
}

impl<T: Into<Node>> From<Vec<T>> for Node {
    fn from(v: Vec<T>) -> Self {
        Node::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// Render a `Node` into a `serde_json::Value`. This is the rendering
/// collaborator at the crate's boundary — it carries no decode logic,
/// only a structural projection, matching how `interleaved.rs` in the
/// upstream project turns already-decoded records into JSON.
pub fn to_json(node: &Node) -> serde_json::Value {
    use serde_json::Value;
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Int(i) => Value::from(*i),
        Node::Float(f) => {
            serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
        }
        Node::Str(s) => Value::String(s.clone()),
        Node::Seq(items) => Value::Array(items.iter().map(to_json).collect()),
        Node::Map(map) => {
            let mut obj = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                obj.insert(k.clone(), to_json(v));
            }
            Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_object_id() {
        let mut m = IndexMap::new();
        m.insert("ObjectId".to_string(), Node::Int(7));
        m.insert(
            "ClassInfo".to_string(),
            Node::Map(IndexMap::from([("ObjectId".to_string(), Node::Int(9))])),
        );
        assert_eq!(Node::Map(m).identity(), Some(7));
    }

    #[test]
    fn identity_falls_back_to_class_info() {
        let mut m = IndexMap::new();
        m.insert(
            "ClassInfo".to_string(),
            Node::Map(IndexMap::from([("ObjectId".to_string(), Node::Int(9))])),
        );
        assert_eq!(Node::Map(m).identity(), Some(9));
    }

    #[test]
    fn to_json_preserves_map_order() {
        let mut m = IndexMap::new();
        m.insert("b".to_string(), Node::Int(1));
        m.insert("a".to_string(), Node::Int(2));
        let json = to_json(&Node::Map(m));
        let keys: Vec<_> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
