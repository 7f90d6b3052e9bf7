//! A live instance of a mapped entity, owned by one session for one request.

use crate::value::FieldValue;
use std::collections::BTreeMap;

/// Loaded (or assigned) content of a relationship.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    /// Cell values keyed by property key.
    pub cells: BTreeMap<String, FieldValue>,
    /// Relationships keyed by property key. Only loaded or assigned ones are present.
    pub relations: BTreeMap<String, Related>,
}

static NULL: FieldValue = FieldValue::Null;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell value; unset cells read as null.
    pub fn get(&self, key: &str) -> &FieldValue {
        self.cells.get(key).unwrap_or(&NULL)
    }

    pub fn set(&mut self, key: impl Into<String>, value: FieldValue) {
        self.cells.insert(key.into(), value);
    }

    pub fn identity(&self, key: &str) -> Option<i64> {
        self.get(key).as_i64()
    }

    pub fn relation(&self, key: &str) -> Option<&Related> {
        self.relations.get(key)
    }

    pub fn set_relation(&mut self, key: impl Into<String>, related: Related) {
        self.relations.insert(key.into(), related);
    }
}
