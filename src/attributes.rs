use tracing::{debug, info};

use crate::datatype::AttributeTarget;
use crate::entity::{Attribute, AttributeValues, Group, Key, Model, Run};
use crate::error::{Result, TensorlabError};
use crate::groups::group_id_or_root;
use crate::integrity::{
    check_definition, check_update, for_target, resolve_effective, usage_stats, values_with_defaults,
};
use crate::storage::Storage;

pub struct Attributes<'s> {
    storage: &'s Storage,
}

impl<'s> Attributes<'s> {
    pub(crate) fn new(storage: &'s Storage) -> Self {
        Self { storage }
    }

    /// Defines `attribute` on `group` (the root for `None`).
    pub fn create(&self, attribute: &mut Attribute, group: Option<&Group>) -> Result<()> {
        if attribute.is_saved() {
            return Err(TensorlabError::invalid_state(format!("{} is already saved", attribute)));
        }
        let group_id = group_id_or_root(self.storage, group)?;
        let (id, default) = self.storage.write(|p| {
            p.group(group_id)?;
            let encoded_default = check_definition(p, group_id, attribute)?;
            let id = p.insert_attribute(group_id, attribute, encoded_default.as_deref())?;
            let default = encoded_default
                .map(|encoded| attribute.value_type.decode(&encoded, &attribute.options))
                .transpose()?;
            Ok((id, default))
        })?;
        attribute.default = default;
        attribute.set_key(Key::new(id, None, group_id, attribute.fields()));
        info!(attribute = %attribute.name, group_id, "attribute defined");
        Ok(())
    }

    /// Stores the changes made to a saved attribute. Only `options`,
    /// `default` and `nullable` can change.
    pub fn update(&self, attribute: &mut Attribute) -> Result<()> {
        let id = attribute.saved_key()?.id;
        if attribute.get_dirty().is_empty() {
            return Ok(());
        }
        let default = self.storage.write(|p| {
            let encoded_default = check_update(p, attribute)?;
            p.update_attribute(id, &attribute.options, encoded_default.as_deref(), attribute.nullable)?;
            encoded_default
                .map(|encoded| attribute.value_type.decode(&encoded, &attribute.options))
                .transpose()
        })?;
        attribute.default = default;
        attribute.mark_synced();
        info!(attribute = %attribute.name, "attribute updated");
        Ok(())
    }

    /// Creates the attribute, or updates it when it is saved already or when
    /// `group` defines an attribute of the same name.
    pub fn define_or_update(&self, group: Option<&Group>, attribute: &mut Attribute) -> Result<()> {
        if attribute.is_saved() {
            let defining = attribute.saved_key()?.owner_id;
            if defining != group_id_or_root(self.storage, group)? {
                return Err(TensorlabError::illegal_argument(format!(
                    "{} is defined on another group",
                    attribute
                )));
            }
            return self.update(attribute);
        }
        let group_id = group_id_or_root(self.storage, group)?;
        match self.storage.read(|p| p.attribute_by_name(group_id, &attribute.name))? {
            Some(existing) => {
                if let Some(key) = existing.key() {
                    attribute.set_key(key.clone());
                }
                self.update(attribute)
            }
            None => self.create(attribute, group),
        }
    }

    pub fn get_defining_group(&self, attribute: &Attribute) -> Result<Group> {
        let group_id = attribute.saved_key()?.owner_id;
        self.storage.read(|p| p.group(group_id))
    }

    /// The definition of `name` made on `group` itself.
    pub fn get(&self, group: Option<&Group>, name: &str) -> Result<Attribute> {
        let group_id = group_id_or_root(self.storage, group)?;
        self.storage
            .read(|p| p.attribute_by_name(group_id, name))?
            .ok_or_else(|| TensorlabError::lookup(format!("Attribute named '{}' is not defined on this group", name)))
    }

    /// Attributes defined on `group` itself.
    pub fn list(&self, group: Option<&Group>) -> Result<Vec<Attribute>> {
        let group_id = group_id_or_root(self.storage, group)?;
        self.storage.read(|p| p.attributes_of_group(group_id))
    }

    /// Attributes in effect for `group`, inherited ones included, by name.
    pub fn list_effective(&self, group: Option<&Group>) -> Result<Vec<Attribute>> {
        let group_id = group_id_or_root(self.storage, group)?;
        let effective = self.storage.read(|p| resolve_effective(p, group_id))?;
        Ok(effective.into_values().collect())
    }

    /// Values of every model attribute in effect for `model`.
    pub fn get_attr_values_for_model(&self, model: &Model) -> Result<AttributeValues> {
        let key = model.saved_key()?;
        let generation = self.storage.generation();
        if let Some(values) = key.cached_values(generation) {
            return Ok(values);
        }
        let values = self.effective_values(key.owner_id, key.uid()?, AttributeTarget::Model)?;
        key.cache_values(generation, &values);
        Ok(values)
    }

    /// Values of every runtime attribute in effect for `run`.
    pub fn get_attr_values_for_run(&self, run: &Run) -> Result<AttributeValues> {
        let key = run.saved_key()?;
        let generation = self.storage.generation();
        if let Some(values) = key.cached_values(generation) {
            return Ok(values);
        }
        let model_id = key.owner_id;
        let group_id = self.storage.read(|p| Ok(p.model(model_id)?.saved_key()?.owner_id))?;
        let values = self.effective_values(group_id, key.uid()?, AttributeTarget::Run)?;
        key.cache_values(generation, &values);
        Ok(values)
    }

    fn effective_values(&self, group_id: i64, uid: &str, target: AttributeTarget) -> Result<AttributeValues> {
        debug!(uid, target = target.noun(), "reading attribute values");
        self.storage.read(|p| {
            let definitions = for_target(&resolve_effective(p, group_id)?, target);
            values_with_defaults(definitions.values(), &p.values_of_target(uid)?)
        })
    }

    /// `(entities with a stored value, entities in scope)`.
    pub fn usage_stats(&self, attribute: &Attribute) -> Result<(usize, usize)> {
        self.storage.read(|p| usage_stats(p, attribute))
    }

    /// Deletes the attribute and every value stored for it. Returns the
    /// number of values removed.
    pub fn delete_with_values(&self, attribute: &mut Attribute) -> Result<usize> {
        let id = attribute.saved_key()?.id;
        let removed = self.storage.write(|p| {
            let removed = p.delete_values_of_attribute(id)?;
            p.delete_attribute(id)?;
            Ok(removed)
        })?;
        info!(attribute = %attribute.name, removed, "attribute deleted");
        attribute.clear_key();
        Ok(removed)
    }
}

impl Attribute {
    /// Defines or updates the attribute on `group` (the root for `None`).
    pub fn save(&mut self, storage: &Storage, group: Option<&Group>) -> Result<()> {
        storage.attributes().define_or_update(group, self)
    }

    pub fn delete(&mut self, storage: &Storage) -> Result<usize> {
        storage.attributes().delete_with_values(self)
    }
}
