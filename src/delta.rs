//! Delta: one identified unit of change
//!
//! A delta carries an id, a kind tag and a human description. Its
//! payload lives elsewhere (in the tracked item or the pack), keyed by
//! `(item uuid, delta uuid)`.
//!
//! Author: Moroya Sakamoto

use uuid::Uuid;

use crate::error::{Result, VcsError};
use crate::tree::DataTree;

pub(crate) const DELTA_NODE: &str = "delta";
const DELTA_ID: &str = "deltaId";
const DELTA_TYPE: &str = "deltaType";
const DELTA_NAME: &str = "deltaName";
const DELTA_INT_PARAM: &str = "deltaIntParam";

/// Human-readable summary, e.g. `"notes added"` with `3`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaDescription {
    pub text: String,
    pub int_param: Option<i64>,
}

impl DeltaDescription {
    pub fn new(text: &str) -> Self {
        Self {
            text: String::from(text),
            int_param: None,
        }
    }

    pub fn with_count(text: &str, count: i64) -> Self {
        Self {
            text: String::from(text),
            int_param: Some(count),
        }
    }
}

/// Delta identity + kind. Equality is by uuid only.
#[derive(Debug, Clone)]
pub struct Delta {
    uuid: Uuid,
    kind: String,
    description: DeltaDescription,
}

impl PartialEq for Delta {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Delta {}

impl Delta {
    /// Fresh delta with a new random id
    pub fn new(kind: &str, description: DeltaDescription) -> Self {
        Self::with_uuid(Uuid::new_v4(), kind, description)
    }

    pub fn with_uuid(uuid: Uuid, kind: &str, description: DeltaDescription) -> Self {
        Self {
            uuid,
            kind: String::from(kind),
            description,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn description(&self) -> &DeltaDescription {
        &self.description
    }

    /// Copy that keeps the original id, so history references stay valid
    pub fn create_copy(&self) -> Self {
        self.clone()
    }

    pub fn serialize(&self) -> DataTree {
        let mut tree = DataTree::new(DELTA_NODE)
            .with_property(DELTA_ID, self.uuid)
            .with_property(DELTA_TYPE, self.kind.as_str())
            .with_property(DELTA_NAME, self.description.text.as_str());
        if let Some(n) = self.description.int_param {
            tree.set_property(DELTA_INT_PARAM, n);
        }
        tree
    }

    pub fn deserialize(tree: &DataTree) -> Result<Self> {
        if !tree.has_name(DELTA_NODE) {
            return Err(VcsError::UnexpectedNode {
                expected: String::from(DELTA_NODE),
                found: String::from(tree.name()),
            });
        }
        let uuid = tree.uuid_property(DELTA_ID)?;
        let kind = tree.require_text(DELTA_TYPE)?;
        let description = DeltaDescription {
            text: String::from(tree.text_property(DELTA_NAME).unwrap_or_default()),
            int_param: tree.int_property(DELTA_INT_PARAM),
        };
        Ok(Self::with_uuid(uuid, kind, description))
    }
}
