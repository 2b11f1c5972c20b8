//! Structured data tree
//!
//! Generic named-node tree used for delta payloads and for the persisted
//! form of revision history. Each node has a name, ordered key/value
//! properties, and ordered children. Cloning is always a deep copy.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VcsError};

/// Property value attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(String::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Text(v.to_string())
    }
}

/// Named node with properties and children
///
/// A tree with an empty name is *invalid*; it stands for "no data"
/// wherever a payload lookup comes up empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTree {
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<DataTree>,
}

impl DataTree {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// The "no data" sentinel
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn with_child(mut self, child: DataTree) -> Self {
        self.children.push(child);
        self
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(String::from(key), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn num_properties(&self) -> usize {
        self.properties.len()
    }

    pub fn text_property(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(Value::as_text)
    }

    pub fn int_property(&self, key: &str) -> Option<i64> {
        self.property(key).and_then(Value::as_int)
    }

    /// Required text property, as an error when absent
    pub fn require_text(&self, key: &str) -> Result<&str> {
        self.text_property(key)
            .ok_or_else(|| VcsError::MissingProperty {
                node: self.name.clone(),
                property: String::from(key),
            })
    }

    /// Required uuid property
    pub fn uuid_property(&self, key: &str) -> Result<Uuid> {
        let text = self.require_text(key)?;
        Uuid::parse_str(text).map_err(|_| VcsError::InvalidUuid {
            value: String::from(text),
        })
    }

    pub fn children(&self) -> &[DataTree] {
        &self.children
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn append_child(&mut self, child: DataTree) {
        self.children.push(child);
    }

    /// Detach and return every child
    pub fn take_children(&mut self) -> Vec<DataTree> {
        std::mem::take(&mut self.children)
    }

    pub fn child_with_name(&self, name: &str) -> Option<&DataTree> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Remove every child matching `pred`, returns how many went
    pub fn remove_children_where(&mut self, mut pred: impl FnMut(&DataTree) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| !pred(c));
        before - self.children.len()
    }

    /// Replace the first child matching `pred`, or append when none does.
    /// Returns `true` if an existing child was replaced.
    pub fn replace_child_where(
        &mut self,
        child: DataTree,
        mut pred: impl FnMut(&DataTree) -> bool,
    ) -> bool {
        match self.children.iter_mut().find(|c| pred(c)) {
            Some(slot) => {
                *slot = child;
                true
            }
            None => {
                self.children.push(child);
                false
            }
        }
    }

    /// FNV-1a hash of the whole subtree (name, properties, children)
    pub fn content_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        self.hash_node(&mut h);
        h
    }

    fn hash_node(&self, h: &mut u64) {
        hash_bytes(h, self.name.as_bytes());
        for (key, value) in &self.properties {
            hash_bytes(h, key.as_bytes());
            hash_value(h, value);
        }
        // Child count separates "a{b}" from "a,b"
        hash_bytes(h, &(self.children.len() as u64).to_le_bytes());
        for child in &self.children {
            child.hash_node(h);
        }
    }
}

fn hash_bytes(h: &mut u64, bytes: &[u8]) {
    for &b in bytes {
        *h ^= b as u64;
        *h = h.wrapping_mul(0x100000001b3);
    }
    *h ^= 0xff;
    *h = h.wrapping_mul(0x100000001b3);
}

fn hash_value(h: &mut u64, value: &Value) {
    match value {
        Value::Bool(b) => hash_bytes(h, &[0, *b as u8]),
        Value::Int(v) => {
            hash_bytes(h, &[1]);
            hash_bytes(h, &v.to_le_bytes());
        }
        Value::Float(v) => {
            hash_bytes(h, &[2]);
            hash_bytes(h, &v.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            hash_bytes(h, &[3]);
            hash_bytes(h, s.as_bytes());
        }
        Value::Bytes(b) => {
            hash_bytes(h, &[4]);
            hash_bytes(h, b);
        }
    }
}
