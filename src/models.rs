use std::path::PathBuf;

use tracing::{debug, info};

use crate::datatype::AttributeTarget;
use crate::entity::{AttributeInput, Group, Key, Model, Run};
use crate::error::{Result, TensorlabError};
use crate::files;
use crate::filter::Filter;
use crate::groups::{check_entity_name, delete_model_rows, group_id_or_root};
use crate::integrity::{encode_supplied, for_target, resolve_effective, validate_and_encode};
use crate::predicate::Expression;
use crate::storage::Storage;

pub struct Models<'s> {
    storage: &'s Storage,
}

impl<'s> Models<'s> {
    pub(crate) fn new(storage: &'s Storage) -> Self {
        Self { storage }
    }

    /// Saves `model` in `group` with the given attribute values and lets the
    /// project build it. Returns the model's data directory.
    ///
    /// The rows are committed only after the build succeeded.
    pub fn create(&self, model: &mut Model, group: Option<&Group>, attrs: &AttributeInput) -> Result<PathBuf> {
        if model.is_saved() {
            return Err(TensorlabError::invalid_state(format!("{} is already saved", model)));
        }
        check_entity_name("Model", &model.name)?;
        let group_id = group_id_or_root(self.storage, group)?;
        let root = self.storage.root_dir().to_path_buf();
        let mut data_path = None;
        let created = self.storage.write(|p| {
            let effective = resolve_effective(p, group_id)?;
            let encoded = validate_and_encode(&effective, AttributeTarget::Model, attrs)?;
            let (id, uid) = p.insert_model(group_id, &model.name)?;
            for (attr_id, value) in &encoded.rows {
                p.insert_value(&uid, *attr_id, value)?;
            }
            let path = files::model_data_path(&root, &uid);
            files::make_dir_writable(&path)?;
            data_path = Some(path.clone());
            debug!(model = %model.name, uid = %uid, "building model");
            let mut log = self.storage.log_stream();
            self.storage.project().build(&encoded.resolved, &path, &mut **log)?;
            Ok((id, uid, path))
        });
        let (id, uid, path) = match created {
            Ok(created) => created,
            Err(e) => {
                if let Some(path) = data_path {
                    files::remove_data_dir(&path);
                }
                return Err(e);
            }
        };
        model.set_key(Key::new(id, Some(uid.clone()), group_id, model.fields()));
        info!(model = %model.name, uid = %uid, "model created");
        Ok(path)
    }

    pub fn get(&self, group: Option<&Group>, name: &str) -> Result<Model> {
        let group_id = group_id_or_root(self.storage, group)?;
        self.storage
            .read(|p| p.model_by_name(group_id, name))?
            .ok_or_else(|| TensorlabError::lookup(format!("Model named '{}' not found", name)))
    }

    /// Models directly in `group` whose name matches the glob pattern and
    /// whose attribute values satisfy the predicate.
    pub fn list(
        &self,
        group: Option<&Group>,
        name_pattern: Option<&str>,
        predicate: Option<&Expression>,
    ) -> Result<Vec<Model>> {
        let group_id = group_id_or_root(self.storage, group)?;
        let models = self.storage.read(|p| p.models_in_group(group_id, name_pattern))?;
        let Some(predicate) = predicate else {
            return Ok(models);
        };
        let definitions = self.storage.read(|p| Ok(for_target(&resolve_effective(p, group_id)?, AttributeTarget::Model)))?;
        let filter = Filter::compile(predicate, &definitions)?;
        let attributes = self.storage.attributes();
        let mut selected = Vec::new();
        for model in models {
            if filter.matches(&attributes.get_attr_values_for_model(&model)?) {
                selected.push(model);
            }
        }
        Ok(selected)
    }

    /// Stores a changed name.
    pub fn rename(&self, model: &mut Model) -> Result<()> {
        let id = model.saved_key()?.id;
        if !model.get_dirty().contains("name") {
            return Ok(());
        }
        check_entity_name("Model", &model.name)?;
        self.storage.write(|p| p.rename_model(id, &model.name))?;
        info!(model = %model.name, "model renamed");
        model.mark_synced();
        Ok(())
    }

    /// Replaces attribute values of an existing model.
    pub fn set_values(&self, model: &Model, attrs: &AttributeInput) -> Result<()> {
        let key = model.saved_key()?;
        let (group_id, uid) = (key.owner_id, key.uid()?);
        self.storage.write(|p| {
            let effective = resolve_effective(p, group_id)?;
            for (attr_id, value) in encode_supplied(&effective, AttributeTarget::Model, attrs)? {
                p.insert_value(uid, attr_id, &value)?;
            }
            Ok(())
        })?;
        info!(model = %model.name, values = attrs.len(), "model attributes updated");
        Ok(())
    }

    pub fn get_group(&self, model: &Model) -> Result<Group> {
        let group_id = model.saved_key()?.owner_id;
        self.storage.read(|p| p.group(group_id))
    }

    pub fn get_data_path(&self, model: &Model) -> Result<PathBuf> {
        Ok(files::model_data_path(self.storage.root_dir(), model.saved_key()?.uid()?))
    }

    pub fn list_runs(&self, model: &Model, predicate: Option<&Expression>) -> Result<Vec<Run>> {
        self.storage.runs().list(model, predicate)
    }

    pub fn count_runs(&self, model: &Model) -> Result<usize> {
        let id = model.saved_key()?.id;
        self.storage.read(|p| p.count_runs(id))
    }

    /// Deletes the model with its runs and all their attribute values.
    pub fn delete_with_content(&self, model: &mut Model) -> Result<()> {
        self.delete(model, true)
    }

    pub(crate) fn delete(&self, model: &mut Model, force: bool) -> Result<()> {
        let id = model.saved_key()?.id;
        let root = self.storage.root_dir().to_path_buf();
        let data_dirs = self.storage.write(|p| {
            let runs = p.count_runs(id)?;
            if !force && runs > 0 {
                return Err(TensorlabError::invalid_state(format!(
                    "Cannot safely delete model {} since it was run {} times",
                    model.name, runs
                )));
            }
            delete_model_rows(p, &root, model)
        })?;
        for dir in &data_dirs {
            files::remove_data_dir(dir);
        }
        info!(model = %model.name, "model deleted");
        model.clear_key();
        Ok(())
    }
}

impl Model {
    /// Deletes the model; without `force` only when it has no runs.
    pub fn delete(&mut self, storage: &Storage, force: bool) -> Result<()> {
        storage.models().delete(self, force)
    }
}
