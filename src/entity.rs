//! Groups, models, runs and attributes as plain value holders.
//!
//! An entity carries a [`Key`] once it has been saved. The key holds the
//! identity assigned by the storage and a snapshot of the fields as they were
//! stored, which is what [`Group::get_dirty`] and friends compare against.
//! Entities never hold a reference to the storage; every persistence operation
//! takes the [`Storage`](crate::storage::Storage) explicitly.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// used for run timestamps
use chrono::{DateTime, Utc};

use crate::datatype::{AttributeTarget, AttributeType, Value};
use crate::error::{Result, TensorlabError};

/// Effective attribute values of a model or run. Every attribute in effect
/// has an entry; `None` stands for null.
pub type AttributeValues = BTreeMap<String, Option<Value>>;

/// Attribute values supplied when creating a model or run.
pub type AttributeInput = BTreeMap<String, Value>;

// ------------- Key -------------
#[derive(Debug, Clone)]
pub struct Key<S> {
    pub id: i64,
    pub uid: Option<String>,
    /// Parent group for groups, defining group for attributes, group for
    /// models and model for runs. The root group is its own owner.
    pub owner_id: i64,
    pub stored: S,
    cached_values: RefCell<Option<(u64, AttributeValues)>>,
}

impl<S> Key<S> {
    pub(crate) fn new(id: i64, uid: Option<String>, owner_id: i64, stored: S) -> Self {
        Self {
            id,
            uid,
            owner_id,
            stored,
            cached_values: RefCell::new(None),
        }
    }

    pub fn uid(&self) -> Result<&str> {
        self.uid
            .as_deref()
            .ok_or_else(|| TensorlabError::internal(format!("entity {} has no uid", self.id)))
    }

    pub(crate) fn cached_values(&self, generation: u64) -> Option<AttributeValues> {
        match &*self.cached_values.borrow() {
            Some((cached_at, values)) if *cached_at == generation => Some(values.clone()),
            _ => None,
        }
    }

    pub(crate) fn cache_values(&self, generation: u64, values: &AttributeValues) {
        *self.cached_values.borrow_mut() = Some((generation, values.clone()));
    }
}

macro_rules! tracked_fields {
    ($entity:ident, $fields:ident { $($field:ident : $ty:ty => $label:literal),+ $(,)? }) => {
        /// Field snapshot as stored.
        #[derive(Debug, Clone, PartialEq)]
        pub struct $fields {
            $(pub $field: $ty),+
        }

        impl $entity {
            pub const FIELDS: &'static [&'static str] = &[$($label),+];

            pub fn fields(&self) -> $fields {
                $fields { $($field: self.$field.clone()),+ }
            }

            pub fn key(&self) -> Option<&Key<$fields>> {
                self.key.as_ref()
            }

            pub fn is_saved(&self) -> bool {
                self.key.is_some()
            }

            pub(crate) fn saved_key(&self) -> Result<&Key<$fields>> {
                self.key.as_ref().ok_or_else(|| {
                    TensorlabError::invalid_state(format!("{} is not saved into the storage", self))
                })
            }

            pub(crate) fn set_key(&mut self, key: Key<$fields>) {
                self.key = Some(key);
            }

            pub(crate) fn clear_key(&mut self) {
                self.key = None;
            }

            /// Makes the current field values the stored snapshot.
            pub(crate) fn mark_synced(&mut self) {
                let fields = self.fields();
                if let Some(key) = self.key.as_mut() {
                    key.stored = fields;
                }
            }

            /// Fields whose value differs from what is stored; all of them
            /// for an unsaved entity.
            pub fn get_dirty(&self) -> BTreeSet<&'static str> {
                let Some(key) = &self.key else {
                    return Self::FIELDS.iter().copied().collect();
                };
                let mut dirty = BTreeSet::new();
                $(
                    if key.stored.$field != self.$field {
                        dirty.insert($label);
                    }
                )+
                dirty
            }

            pub fn get_synced(&self) -> BTreeSet<&'static str> {
                if self.key.is_none() {
                    return BTreeSet::new();
                }
                let dirty = self.get_dirty();
                Self::FIELDS.iter().copied().filter(|f| !dirty.contains(f)).collect()
            }

            /// Reverts every field to its stored value.
            pub fn reset(&mut self) -> Result<()> {
                let stored = self.saved_key()?.stored.clone();
                $( self.$field = stored.$field; )+
                Ok(())
            }

            /// An unsaved copy with the same field values. Fields are public;
            /// use [`Self::derive_with`] to change some of them on the way.
            pub fn derive(&self) -> Self {
                Self {
                    $($field: self.$field.clone(),)+
                    key: None,
                }
            }

            /// An unsaved copy with `overrides` applied to it.
            pub fn derive_with(&self, overrides: impl FnOnce(&mut Self)) -> Self {
                let mut derived = self.derive();
                overrides(&mut derived);
                derived
            }
        }

        impl PartialEq for $entity {
            fn eq(&self, other: &Self) -> bool {
                self.fields() == other.fields()
            }
        }
    };
}

// ------------- Group -------------
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    key: Option<Key<GroupFields>>,
}

tracked_fields!(Group, GroupFields { name: String => "name" });

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key: None }
    }

    pub fn is_root(&self) -> bool {
        self.key.as_ref().is_some_and(|key| key.id == key.owner_id)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Group(name='{}')", self.name)
    }
}

// ------------- Model -------------
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    key: Option<Key<ModelFields>>,
}

tracked_fields!(Model, ModelFields { name: String => "name" });

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key: None }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Model(name='{}')", self.name)
    }
}

// ------------- Run -------------
#[derive(Debug, Clone)]
pub struct Run {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    key: Option<Key<RunFields>>,
}

tracked_fields!(Run, RunFields {
    started_at: Option<DateTime<Utc>> => "started_at",
    finished_at: Option<DateTime<Utc>> => "finished_at",
});

impl Run {
    /// A run that is stamped with the current time when created.
    pub fn new() -> Self {
        Self { started_at: None, finished_at: None, key: None }
    }

    pub fn started_at(time: DateTime<Utc>) -> Self {
        Self { started_at: Some(time), finished_at: None, key: None }
    }
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |t: &Option<DateTime<Utc>>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        write!(f, "Run(started_at={}, finished_at={})", show(&self.started_at), show(&self.finished_at))
    }
}

// ------------- Attribute -------------
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value_type: AttributeType,
    pub options: String,
    pub default: Option<Value>,
    pub nullable: bool,
    pub runtime: bool,
    key: Option<Key<AttributeFields>>,
}

tracked_fields!(Attribute, AttributeFields {
    name: String => "name",
    value_type: AttributeType => "type",
    options: String => "options",
    default: Option<Value> => "default",
    nullable: bool => "nullable",
    runtime: bool => "runtime",
});

impl Attribute {
    /// A non-nullable attribute without options or default.
    pub fn new(name: impl Into<String>, value_type: AttributeType, runtime: bool) -> Self {
        Self {
            name: name.into(),
            value_type,
            options: String::new(),
            default: None,
            nullable: false,
            runtime,
            key: None,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Every entity in scope must store its own value.
    pub fn required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    pub fn target(&self) -> AttributeTarget {
        AttributeTarget::from_runtime(self.runtime)
    }
}

impl AttributeFields {
    pub fn required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Attribute(name='{}', type={}", self.name, self.value_type)?;
        if !self.options.is_empty() {
            write!(f, ", options='{}'", self.options)?;
        }
        if let Some(default) = &self.default {
            write!(f, ", default={}", default)?;
        }
        write!(f, ", nullable={}, runtime={})", self.nullable, self.runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved_group(name: &str) -> Group {
        let mut group = Group::new(name);
        let fields = group.fields();
        group.set_key(Key::new(2, Some("0123456789abcdef".into()), 1, fields));
        group
    }

    #[test]
    fn unsaved_entities_are_all_dirty() {
        let attribute = Attribute::new("lr", AttributeType::Float, false);
        assert_eq!(attribute.get_dirty().len(), Attribute::FIELDS.len());
        assert!(attribute.get_synced().is_empty());
        assert!(matches!(Run::new().derive().reset(), Err(TensorlabError::InvalidState(_))));
    }

    #[test]
    fn dirty_fields_and_reset() {
        let mut group = saved_group("alpha");
        assert!(group.get_dirty().is_empty());
        assert_eq!(group.get_synced(), BTreeSet::from(["name"]));

        group.name = "beta".into();
        assert_eq!(group.get_dirty(), BTreeSet::from(["name"]));
        group.reset().unwrap();
        assert_eq!(group.name, "alpha");
    }

    #[test]
    fn equality_ignores_identity() {
        let saved = saved_group("alpha");
        assert_eq!(saved, Group::new("alpha"));
        let derived = saved.derive();
        assert!(!derived.is_saved());
        assert_eq!(derived, saved);
    }

    #[test]
    fn derive_with_applies_overrides() {
        let mut saved = Attribute::new("lr", AttributeType::Float, false).with_default(0.1);
        let fields = saved.fields();
        saved.set_key(Key::new(3, None, 1, fields));

        let derived = saved.derive_with(|a| {
            a.name = "momentum".into();
            a.default = None;
        });
        assert!(!derived.is_saved());
        assert_eq!(derived.name, "momentum");
        assert_eq!(derived.default, None);
        assert_eq!(derived.value_type, AttributeType::Float);
        assert_eq!(saved.name, "lr", "the original is untouched");
    }

    #[test]
    fn required_follows_nullable_and_default() {
        let attribute = Attribute::new("n", AttributeType::Integer, false);
        assert!(attribute.required());
        assert!(!attribute.clone().nullable(true).required());
        assert!(!attribute.with_default(3).required());
    }
}
