use std::path::PathBuf;

use tracing::info;

use crate::entity::{Group, Key, Model};
use crate::error::{Result, TensorlabError};
use crate::files;
use crate::persist::Persistor;
use crate::predicate::Expression;
use crate::storage::Storage;

/// Group and model names are path segments.
pub(crate) fn check_entity_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.trim() != name {
        return Err(TensorlabError::illegal_argument(format!(
            "{} name '{}' must be non-empty, without '/' and without surrounding spaces",
            kind, name
        )));
    }
    Ok(())
}

/// Id of `group`, or of the root group for `None`.
pub(crate) fn group_id_or_root(storage: &Storage, group: Option<&Group>) -> Result<i64> {
    match group {
        Some(group) => Ok(group.saved_key()?.id),
        None => Ok(storage.root_group_id()),
    }
}

pub struct Groups<'s> {
    storage: &'s Storage,
}

impl<'s> Groups<'s> {
    pub(crate) fn new(storage: &'s Storage) -> Self {
        Self { storage }
    }

    pub fn root(&self) -> Result<Group> {
        self.storage.read(|p| p.group(self.storage.root_group_id()))
    }

    /// Saves `group` as a subgroup of `parent` (the root for `None`).
    pub fn create(&self, group: &mut Group, parent: Option<&Group>) -> Result<()> {
        if group.is_saved() {
            return Err(TensorlabError::invalid_state(format!("{} is already saved", group)));
        }
        check_entity_name("Group", &group.name)?;
        let parent_id = group_id_or_root(self.storage, parent)?;
        let (id, uid) = self.storage.write(|p| {
            p.group(parent_id)?;
            p.insert_group(parent_id, &group.name)
        })?;
        group.set_key(Key::new(id, Some(uid), parent_id, group.fields()));
        info!(group = %group.name, parent_id, "group created");
        Ok(())
    }

    /// Resolves a slash separated path below the root; `None` is the root.
    pub fn get(&self, qualified_name: Option<&str>) -> Result<Group> {
        let path = qualified_name.map(|name| name.trim_matches('/')).unwrap_or_default();
        self.storage.read(|p| {
            let mut group = p.group(self.storage.root_group_id())?;
            if path.is_empty() {
                return Ok(group);
            }
            let mut walked = Vec::new();
            for segment in path.split('/') {
                walked.push(segment);
                group = p
                    .group_by_name(group.saved_key()?.id, segment)?
                    .ok_or_else(|| TensorlabError::lookup(format!("Group named '{}' not found", walked.join("/"))))?;
            }
            Ok(group)
        })
    }

    /// Direct subgroups of `parent`, optionally filtered by a glob pattern.
    pub fn list(&self, parent: Option<&Group>, name_pattern: Option<&str>) -> Result<Vec<Group>> {
        let parent_id = group_id_or_root(self.storage, parent)?;
        self.storage.read(|p| p.child_groups(parent_id, name_pattern))
    }

    pub fn get_parent(&self, group: &Group) -> Result<Option<Group>> {
        if group.is_root() {
            return Ok(None);
        }
        let parent_id = group.saved_key()?.owner_id;
        self.storage.read(|p| p.group(parent_id)).map(Some)
    }

    /// Path of `group` as accepted by [`Groups::get`]; empty for the root.
    pub fn qualified_name(&self, group: &Group) -> Result<String> {
        let id = group.saved_key()?.id;
        self.storage.read(|p| {
            let mut names = Vec::new();
            for ancestor in crate::integrity::ancestry(p, id)? {
                let ancestor = p.group(ancestor)?;
                if !ancestor.is_root() {
                    names.push(ancestor.name);
                }
            }
            names.reverse();
            Ok(names.join("/"))
        })
    }

    /// Stores a changed name.
    pub fn rename(&self, group: &mut Group) -> Result<()> {
        let key = group.saved_key()?;
        if group.is_root() {
            return Err(TensorlabError::illegal_argument("Cannot rename root group"));
        }
        if !group.get_dirty().contains("name") {
            return Ok(());
        }
        check_entity_name("Group", &group.name)?;
        let id = key.id;
        self.storage.write(|p| p.rename_group(id, &group.name))?;
        info!(group = %group.name, "group renamed");
        group.mark_synced();
        Ok(())
    }

    /// Deletes the group with its subgroups, models, runs and attributes.
    pub fn delete_with_content(&self, group: &mut Group) -> Result<()> {
        self.delete(group, true)
    }

    pub(crate) fn delete(&self, group: &mut Group, force: bool) -> Result<()> {
        let id = group.saved_key()?.id;
        if group.is_root() {
            return Err(TensorlabError::illegal_argument("Cannot delete root group"));
        }
        let root = self.storage.root_dir().to_path_buf();
        let data_dirs = self.storage.write(|p| {
            let subtree = p.subtree(id)?;
            if !force {
                let mut models = 0;
                for group_id in &subtree {
                    models += p.count_models(*group_id)?;
                }
                if models > 0 {
                    return Err(TensorlabError::invalid_state(format!(
                        "Cannot safely delete group {} since it has {} models",
                        group.name, models
                    )));
                }
            }
            let mut data_dirs = Vec::new();
            for group_id in subtree.iter().rev() {
                for model in p.models_in_group(*group_id, None)? {
                    data_dirs.extend(delete_model_rows(p, &root, &model)?);
                }
                for attribute in p.attributes_of_group(*group_id)? {
                    let attr_id = attribute.saved_key()?.id;
                    p.delete_values_of_attribute(attr_id)?;
                    p.delete_attribute(attr_id)?;
                }
                p.delete_group(*group_id)?;
            }
            Ok(data_dirs)
        })?;
        for dir in &data_dirs {
            files::remove_data_dir(dir);
        }
        info!(group = %group.name, "group deleted");
        group.clear_key();
        Ok(())
    }

    pub fn count_models(&self, group: Option<&Group>) -> Result<usize> {
        let id = group_id_or_root(self.storage, group)?;
        self.storage.read(|p| p.count_models(id))
    }

    pub fn count_runs(&self, group: Option<&Group>) -> Result<usize> {
        let id = group_id_or_root(self.storage, group)?;
        self.storage.read(|p| p.count_runs_in_group(id))
    }

    pub fn list_models(
        &self,
        group: Option<&Group>,
        name_pattern: Option<&str>,
        predicate: Option<&Expression>,
    ) -> Result<Vec<Model>> {
        self.storage.models().list(group, name_pattern, predicate)
    }
}

/// Deletes a model's runs, values and row. Returns the data directories
/// that no longer belong to anything.
pub(crate) fn delete_model_rows(p: &Persistor<'_>, root: &std::path::Path, model: &Model) -> Result<Vec<PathBuf>> {
    let key = model.saved_key()?;
    let mut data_dirs = Vec::new();
    for run in p.runs_of_model(key.id)? {
        let run_key = run.saved_key()?;
        let uid = run_key.uid()?;
        p.delete_values_of_target(uid)?;
        p.delete_run(run_key.id)?;
        data_dirs.push(files::run_data_path(root, uid));
    }
    let uid = key.uid()?;
    p.delete_values_of_target(uid)?;
    p.delete_model(key.id)?;
    data_dirs.push(files::model_data_path(root, uid));
    Ok(data_dirs)
}

impl Group {
    /// Creates the group under the root if unsaved, otherwise stores a rename.
    pub fn save(&mut self, storage: &Storage) -> Result<()> {
        if self.is_saved() { storage.groups().rename(self) } else { storage.groups().create(self, None) }
    }

    /// Deletes the group; without `force` only when no models are below it.
    pub fn delete(&mut self, storage: &Storage, force: bool) -> Result<()> {
        storage.groups().delete(self, force)
    }
}
