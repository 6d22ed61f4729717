//! Rich-text buffer backed by a Yrs `Text`.
//!
//! Every mutation goes through [`RichText::apply`], so the delta returned by
//! the local editing helpers reproduces the change exactly when a peer
//! applies it to its own buffer.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Number, Value};
use thiserror::Error;
use yrs::types::text::{Diff, YChange};
use yrs::types::Attrs;
use yrs::{Any, Doc, GetString, OffsetKind, Options, Out, ReadTxn, Text, Transact, WriteTxn};

use crate::delta::{utf16_len, utf16_slice, Attributes, Delta, DeltaOp};

/// Name of the root text type holding the document body.
const CONTENT: &str = "content";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("span {index}..{index}+{span} is out of bounds for buffer of length {len}")]
    OutOfBounds { index: u32, span: u32, len: u32 },
}

/// Editable rich-text content with an operation-based change model.
pub struct RichText {
    doc: Doc,
}

impl Default for RichText {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RichText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RichText").field("text", &self.text()).finish()
    }
}

impl RichText {
    pub fn new() -> Self {
        let options = Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        };
        Self {
            doc: Doc::with_options(options),
        }
    }

    /// Build a buffer holding the content of an insert-only snapshot.
    pub fn from_snapshot(snapshot: &Delta) -> Result<Self, BufferError> {
        let buffer = Self::new();
        buffer.apply(snapshot)?;
        Ok(buffer)
    }

    /// Replace the whole content with `snapshot`.
    pub fn load(&self, snapshot: &Delta) -> Result<(), BufferError> {
        let len = self.len();
        if len > 0 {
            self.apply(&Delta::new().delete(len))?;
        }
        self.apply(snapshot)
    }

    /// Apply an operation. Spans are applied left to right; a span reaching
    /// past the end of the buffer stops the operation with an error.
    pub fn apply(&self, delta: &Delta) -> Result<(), BufferError> {
        let mut txn = self.doc.transact_mut();
        let text = txn.get_or_insert_text(CONTENT);
        let mut index = 0u32;

        for op in &delta.ops {
            let len = text.len(&txn);
            match op {
                DeltaOp::Retain { retain, attributes } => {
                    let end = checked_end(index, *retain, len)?;
                    if let Some(attributes) = attributes.as_ref().filter(|a| !a.is_empty()) {
                        text.format(&mut txn, index, *retain, to_attrs(attributes));
                    }
                    index = end;
                }
                DeltaOp::Insert { insert, attributes } => {
                    if insert.is_empty() {
                        continue;
                    }
                    checked_end(index, 0, len)?;
                    // Explicit (possibly empty) attributes: inserted text does
                    // not inherit the formatting of its left neighbour.
                    let attrs = attributes.as_ref().map(to_attrs).unwrap_or_default();
                    text.insert_with_attributes(&mut txn, index, insert, attrs);
                    index += utf16_len(insert);
                }
                DeltaOp::Delete { delete } => {
                    checked_end(index, *delete, len)?;
                    text.remove_range(&mut txn, index, *delete);
                }
            }
        }
        Ok(())
    }

    /// Materialise the content as an insert-only delta.
    pub fn snapshot(&self) -> Delta {
        let txn = self.doc.transact();
        let mut snapshot = Delta::new();
        let Some(text) = txn.get_text(CONTENT) else {
            return snapshot;
        };
        let chunks: Vec<Diff<YChange>> = text.diff(&txn, YChange::identity);
        for chunk in chunks {
            match chunk.insert {
                Out::Any(Any::String(s)) => {
                    let attributes = chunk
                        .attributes
                        .map(|attrs| from_attrs(&attrs))
                        .filter(|attrs| !attrs.is_empty());
                    snapshot.push(DeltaOp::Insert {
                        insert: s.to_string(),
                        attributes,
                    });
                }
                other => log::warn!("Skipping non-text content in snapshot: {other:?}"),
            }
        }
        snapshot
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        txn.get_text(CONTENT).map_or(0, |text| text.len(&txn))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain text content.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        txn.get_text(CONTENT)
            .map(|text| text.get_string(&txn))
            .unwrap_or_default()
    }

    /// Plain text of `[start, start + len)`, clamped to the buffer.
    pub fn text_range(&self, start: u32, len: u32) -> String {
        utf16_slice(&self.text(), start, len)
    }

    /// Formatting of the character at `index` (empty when unformatted or out of range).
    pub fn attributes_at(&self, index: u32) -> Attributes {
        let mut offset = 0u32;
        for op in self.snapshot().ops {
            let len = op.len();
            if index < offset + len {
                return op.attributes().cloned().unwrap_or_default();
            }
            offset += len;
        }
        Attributes::new()
    }

    /// Insert plain text; returns the operation describing the change.
    pub fn insert(&self, index: u32, text: &str) -> Result<Delta, BufferError> {
        self.insert_with_attributes(index, text, Attributes::new())
    }

    pub fn insert_with_attributes(
        &self,
        index: u32,
        text: &str,
        attributes: Attributes,
    ) -> Result<Delta, BufferError> {
        let change = Delta::new().retain(index).insert_with(text, attributes);
        self.apply(&change)?;
        Ok(change)
    }

    pub fn delete(&self, index: u32, len: u32) -> Result<Delta, BufferError> {
        let change = Delta::new().retain(index).delete(len);
        self.apply(&change)?;
        Ok(change)
    }

    pub fn format(&self, index: u32, len: u32, attributes: Attributes) -> Result<Delta, BufferError> {
        let change = Delta::new().retain(index).retain_with(len, attributes);
        self.apply(&change)?;
        Ok(change)
    }
}

fn checked_end(index: u32, span: u32, len: u32) -> Result<u32, BufferError> {
    index
        .checked_add(span)
        .filter(|end| *end <= len)
        .ok_or(BufferError::OutOfBounds { index, span, len })
}

fn to_attrs(attributes: &Attributes) -> Attrs {
    attributes
        .iter()
        .map(|(key, value)| (Arc::from(key.as_str()), to_any(value)))
        .collect()
}

fn from_attrs(attrs: &Attrs) -> Attributes {
    attrs
        .iter()
        .filter(|(_, value)| !matches!(value, Any::Null | Any::Undefined))
        .map(|(key, value)| (key.to_string(), from_any(value)))
        .collect()
}

fn to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(Arc::from(items.iter().map(to_any).collect::<Vec<_>>())),
        Value::Object(map) => Any::Map(Arc::new(
            map.iter()
                .map(|(key, value)| (key.clone(), to_any(value)))
                .collect::<HashMap<_, _>>(),
        )),
    }
}

fn from_any(value: &Any) -> Value {
    match value {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(from_any).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), from_any(value)))
                .collect(),
        ),
    }
}
