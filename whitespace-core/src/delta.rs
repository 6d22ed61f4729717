//! Operation model shared by the hub, the relay and the editors.
//!
//! A [`Delta`] is an ordered list of retain / insert / delete spans in the
//! Quill delta JSON shape:
//!
//! ```text
//! {"ops":[{"retain":5},{"insert":"X","attributes":{"bold":true}},{"delete":2}]}
//! ```
//!
//! Offsets and lengths are counted in UTF-16 code units, the unit browser
//! editors report selections in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Formatting attributes attached to an insert or retain span.
pub type Attributes = Map<String, Value>;

/// A single span of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaOp {
    Insert {
        insert: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Retain {
        retain: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: u32,
    },
}

impl DeltaOp {
    /// Length of the span in UTF-16 code units.
    pub fn len(&self) -> u32 {
        match self {
            DeltaOp::Insert { insert, .. } => utf16_len(insert),
            DeltaOp::Retain { retain, .. } => *retain,
            DeltaOp::Delete { delete } => *delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            DeltaOp::Insert { attributes, .. } | DeltaOp::Retain { attributes, .. } => {
                attributes.as_ref().filter(|a| !a.is_empty())
            }
            DeltaOp::Delete { .. } => None,
        }
    }
}

/// An ordered edit instruction set (or, when insert-only, a full snapshot).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(mut self, n: u32) -> Self {
        self.push(DeltaOp::Retain { retain: n, attributes: None });
        self
    }

    pub fn retain_with(mut self, n: u32, attributes: Attributes) -> Self {
        self.push(DeltaOp::Retain { retain: n, attributes: non_empty(attributes) });
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(DeltaOp::Insert { insert: text.into(), attributes: None });
        self
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        self.push(DeltaOp::Insert { insert: text.into(), attributes: non_empty(attributes) });
        self
    }

    pub fn delete(mut self, n: u32) -> Self {
        self.push(DeltaOp::Delete { delete: n });
        self
    }

    /// Append a span, merging it into the previous one when they are compatible.
    pub fn push(&mut self, op: DeltaOp) {
        if op.is_empty() {
            return;
        }
        let merged = match (self.ops.last_mut(), &op) {
            (
                Some(DeltaOp::Insert { insert: last, attributes: last_attrs }),
                DeltaOp::Insert { insert, attributes },
            ) if last_attrs == attributes => {
                last.push_str(insert);
                true
            }
            (
                Some(DeltaOp::Retain { retain: last, attributes: last_attrs }),
                DeltaOp::Retain { retain, attributes },
            ) if last_attrs == attributes => {
                *last += retain;
                true
            }
            (Some(DeltaOp::Delete { delete: last }), DeltaOp::Delete { delete }) => {
                *last += delete;
                true
            }
            _ => false,
        };
        if !merged {
            self.ops.push(op);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when the delta only contains inserts, i.e. it is a document snapshot.
    pub fn is_insert_only(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, DeltaOp::Insert { .. }))
    }

    /// Total length of the inserted content.
    pub fn insert_len(&self) -> u32 {
        self.ops
            .iter()
            .filter(|op| matches!(op, DeltaOp::Insert { .. }))
            .map(DeltaOp::len)
            .sum()
    }

    /// Concatenated text of all inserts.
    pub fn plain_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Insert { insert, .. } => Some(insert.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Recognise plain typing: an optional unformatted retain, one insert, and
    /// nothing but unformatted retains afterwards.
    pub fn as_typed_insert(&self) -> Option<(u32, &str)> {
        let mut offset = 0u32;
        let mut typed = None;
        for op in &self.ops {
            match op {
                DeltaOp::Retain { retain, attributes } => {
                    if attributes.as_ref().is_some_and(|a| !a.is_empty()) {
                        return None;
                    }
                    if typed.is_none() {
                        offset += retain;
                    }
                }
                DeltaOp::Insert { insert, .. } => {
                    if typed.is_some() {
                        return None;
                    }
                    typed = Some(insert.as_str());
                }
                DeltaOp::Delete { .. } => return None,
            }
        }
        typed.map(|text| (offset, text))
    }

    /// Map a position in the pre-change document to the post-change document.
    ///
    /// An insert exactly at `index` pushes the position to the right.
    pub fn transform_position(&self, index: u32) -> u32 {
        let mut index = index;
        let mut offset = 0u32;
        for op in &self.ops {
            if offset > index {
                break;
            }
            match op {
                DeltaOp::Delete { delete } => {
                    index -= (*delete).min(index - offset);
                }
                DeltaOp::Insert { insert, .. } => {
                    let len = utf16_len(insert);
                    index += len;
                    offset += len;
                }
                DeltaOp::Retain { retain, .. } => offset += retain,
            }
        }
        index
    }
}

fn non_empty(attributes: Attributes) -> Option<Attributes> {
    if attributes.is_empty() {
        None
    } else {
        Some(attributes)
    }
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Substring of `s` addressed in UTF-16 code units, clamped to the string.
pub fn utf16_slice(s: &str, start: u32, len: u32) -> String {
    let units: Vec<u16> = s
        .encode_utf16()
        .skip(start as usize)
        .take(len as usize)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quill_json_shape() {
        let raw = json!({"ops": [
            {"retain": 5},
            {"insert": "X", "attributes": {"bold": true}},
            {"delete": 2}
        ]});
        let delta: Delta = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(delta.ops.len(), 3);
        assert_eq!(delta.ops[0], DeltaOp::Retain { retain: 5, attributes: None });
        assert_eq!(delta.ops[2], DeltaOp::Delete { delete: 2 });
        assert_eq!(serde_json::to_value(&delta).unwrap(), raw);
    }

    #[test]
    fn test_builder_merges_adjacent_spans() {
        let delta = Delta::new().retain(2).retain(3).insert("a").insert("b").delete(1).delete(1);
        assert_eq!(
            delta.ops,
            vec![
                DeltaOp::Retain { retain: 5, attributes: None },
                DeltaOp::Insert { insert: "ab".into(), attributes: None },
                DeltaOp::Delete { delete: 2 },
            ]
        );
    }

    #[test]
    fn test_builder_skips_empty_spans() {
        let delta = Delta::new().retain(0).insert("").delete(0);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_typed_insert_detection() {
        let typing = Delta::new().retain(5).insert("X");
        assert_eq!(typing.as_typed_insert(), Some((5, "X")));

        let at_start = Delta::new().insert("X").retain(10);
        assert_eq!(at_start.as_typed_insert(), Some((0, "X")));

        let replace = Delta::new().retain(5).insert("X").delete(2);
        assert_eq!(replace.as_typed_insert(), None);

        let mut bold = Attributes::new();
        bold.insert("bold".into(), json!(true));
        let format = Delta::new().retain_with(3, bold);
        assert_eq!(format.as_typed_insert(), None);
    }

    #[test]
    fn test_transform_position() {
        // Insert before the position shifts it right.
        assert_eq!(Delta::new().retain(2).insert("abc").transform_position(5), 8);
        // Insert exactly at the position shifts it right.
        assert_eq!(Delta::new().retain(5).insert("abc").transform_position(5), 8);
        // Insert after the position leaves it alone.
        assert_eq!(Delta::new().retain(6).insert("abc").transform_position(5), 5);
        // Delete before the position shifts it left.
        assert_eq!(Delta::new().retain(1).delete(2).transform_position(5), 3);
        // Delete spanning the position clamps it to the delete start.
        assert_eq!(Delta::new().retain(4).delete(4).transform_position(5), 4);
    }

    #[test]
    fn test_utf16_helpers() {
        assert_eq!(utf16_len("héllo"), 5);
        assert_eq!(utf16_len("😀"), 2);
        assert_eq!(utf16_slice("hello world", 6, 5), "world");
        assert_eq!(utf16_slice("abc", 2, 10), "c");
    }

    #[test]
    fn test_snapshot_helpers() {
        let snapshot = Delta::new().insert("Hello").insert(" world");
        assert!(snapshot.is_insert_only());
        assert_eq!(snapshot.insert_len(), 11);
        assert_eq!(snapshot.plain_text(), "Hello world");
        assert!(!Delta::new().retain(1).is_insert_only());
    }
}
