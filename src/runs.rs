use std::path::PathBuf;

// used for run timestamps
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::datatype::AttributeTarget;
use crate::entity::{AttributeInput, Group, Key, Model, Run};
use crate::error::{Result, TensorlabError};
use crate::files;
use crate::filter::Filter;
use crate::integrity::{for_target, resolve_effective, validate_and_encode};
use crate::predicate::Expression;
use crate::storage::Storage;

pub struct Runs<'s> {
    storage: &'s Storage,
}

impl<'s> Runs<'s> {
    pub(crate) fn new(storage: &'s Storage) -> Self {
        Self { storage }
    }

    /// Saves `run` for `model` with the given runtime attribute values and
    /// lets the project execute it. `started_at` is set to now unless the run
    /// already carries a start time; `finished_at` is set once the project
    /// returns. Returns the run's data directory.
    pub fn create(&self, model: &Model, run: &mut Run, attrs: &AttributeInput) -> Result<PathBuf> {
        if run.is_saved() {
            return Err(TensorlabError::invalid_state(format!("{} is already saved", run)));
        }
        let model_key = model.saved_key()?;
        let (model_id, group_id, model_uid) = (model_key.id, model_key.owner_id, model_key.uid()?);
        let root = self.storage.root_dir().to_path_buf();
        let started_at = run.started_at.unwrap_or_else(Utc::now);
        let mut data_path = None;
        let created = self.storage.write(|p| {
            let effective = resolve_effective(p, group_id)?;
            let encoded = validate_and_encode(&effective, AttributeTarget::Run, attrs)?;
            let (id, uid) = p.insert_run(model_id, started_at, None)?;
            for (attr_id, value) in &encoded.rows {
                p.insert_value(&uid, *attr_id, value)?;
            }
            let path = files::run_data_path(&root, &uid);
            files::make_dir_writable(&path)?;
            data_path = Some(path.clone());

            // the project sees the model's values overlaid with the run's
            let mut attributes = self.storage.attributes().get_attr_values_for_model(model)?;
            attributes.extend(encoded.resolved);
            debug!(model = %model.name, uid = %uid, "executing run");
            let mut log = self.storage.log_stream();
            self.storage.project().run(&attributes, &files::model_data_path(&root, model_uid), &path, &mut **log)?;

            let finished_at = Utc::now();
            p.update_run_times(id, Some(started_at), Some(finished_at))?;
            Ok((id, uid, path, finished_at))
        });
        let (id, uid, path, finished_at) = match created {
            Ok(created) => created,
            Err(e) => {
                if let Some(path) = data_path {
                    files::remove_data_dir(&path);
                }
                return Err(e);
            }
        };
        run.started_at = Some(started_at);
        run.finished_at = Some(finished_at);
        run.set_key(Key::new(id, Some(uid.clone()), model_id, run.fields()));
        info!(model = %model.name, uid = %uid, "run finished");
        Ok(path)
    }

    /// The `index`-th run of `model` by start time, `None` past the end.
    pub fn get(&self, model: &Model, index: usize) -> Result<Option<Run>> {
        let model_id = model.saved_key()?.id;
        self.storage.read(|p| p.run_at(model_id, index))
    }

    /// Runs of `model` by start time whose runtime attribute values satisfy
    /// the predicate.
    pub fn list(&self, model: &Model, predicate: Option<&Expression>) -> Result<Vec<Run>> {
        let key = model.saved_key()?;
        let (model_id, group_id) = (key.id, key.owner_id);
        let runs = self.storage.read(|p| p.runs_of_model(model_id))?;
        let Some(predicate) = predicate else {
            return Ok(runs);
        };
        let definitions = self.storage.read(|p| Ok(for_target(&resolve_effective(p, group_id)?, AttributeTarget::Run)))?;
        let filter = Filter::compile(predicate, &definitions)?;
        let attributes = self.storage.attributes();
        let mut selected = Vec::new();
        for run in runs {
            if filter.matches(&attributes.get_attr_values_for_run(&run)?) {
                selected.push(run);
            }
        }
        Ok(selected)
    }

    /// Updates the given timestamps; `None` leaves a timestamp unchanged, so
    /// a start time can never be cleared.
    pub fn set_time(
        &self,
        run: &mut Run,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = run.saved_key()?.id;
        if let Some(started_at) = started_at {
            run.started_at = Some(started_at);
        }
        if let Some(finished_at) = finished_at {
            run.finished_at = Some(finished_at);
        }
        self.storage.write(|p| p.update_run_times(id, run.started_at, run.finished_at))?;
        run.mark_synced();
        Ok(())
    }

    pub fn get_data_path(&self, run: &Run) -> Result<PathBuf> {
        Ok(files::run_data_path(self.storage.root_dir(), run.saved_key()?.uid()?))
    }

    pub fn get_model(&self, run: &Run) -> Result<Model> {
        let model_id = run.saved_key()?.owner_id;
        self.storage.read(|p| p.model(model_id))
    }

    pub fn get_group(&self, run: &Run) -> Result<Group> {
        let model_id = run.saved_key()?.owner_id;
        self.storage.read(|p| {
            let group_id = p.model(model_id)?.saved_key()?.owner_id;
            p.group(group_id)
        })
    }

    /// Deletes the run and its attribute values.
    pub fn delete(&self, run: &mut Run) -> Result<()> {
        let key = run.saved_key()?;
        let (id, uid) = (key.id, key.uid()?.to_string());
        self.storage.write(|p| {
            p.delete_values_of_target(&uid)?;
            p.delete_run(id)
        })?;
        files::remove_data_dir(&files::run_data_path(self.storage.root_dir(), &uid));
        info!(uid = %uid, "run deleted");
        run.clear_key();
        Ok(())
    }
}

impl Run {
    pub fn delete(&mut self, storage: &Storage) -> Result<()> {
        storage.runs().delete(self)
    }
}
