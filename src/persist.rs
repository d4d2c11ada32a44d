// used for persistence
use rusqlite::{Connection, OptionalExtension, Row, params};
// used for run timestamps
use chrono::{DateTime, Utc};
// used to give models and runs their unique ids
use uuid::Uuid;

use std::collections::HashMap;

use crate::datatype::AttributeType;
use crate::entity::{Attribute, Group, Key, Model, Run};
use crate::error::{Result, TensorlabError, on_constraint};

/// Row-level access to the five tables. Borrows a connection (usually an open
/// transaction) and holds no state of its own, so one is created per unit of
/// work.
pub struct Persistor<'db> {
    pub db: &'db Connection,
}

/// 16 hex characters of a random v4 uuid.
pub fn new_uid() -> String {
    let mut uid = Uuid::new_v4().simple().to_string();
    uid.truncate(16);
    uid
}

fn group_from_row(row: &Row) -> rusqlite::Result<Group> {
    let mut group = Group::new(row.get::<_, String>(3)?);
    let fields = group.fields();
    group.set_key(Key::new(row.get(0)?, Some(row.get(1)?), row.get(2)?, fields));
    Ok(group)
}

fn model_from_row(row: &Row) -> rusqlite::Result<Model> {
    let mut model = Model::new(row.get::<_, String>(3)?);
    let fields = model.fields();
    model.set_key(Key::new(row.get(0)?, Some(row.get(1)?), row.get(2)?, fields));
    Ok(model)
}

fn run_from_row(row: &Row) -> rusqlite::Result<Run> {
    let mut run = Run::started_at(row.get(3)?);
    run.finished_at = row.get(4)?;
    let fields = run.fields();
    run.set_key(Key::new(row.get(0)?, Some(row.get(1)?), row.get(2)?, fields));
    Ok(run)
}

// Attributes are read raw first because decoding the default can fail with
// one of our own errors rather than a rusqlite one.
struct StoredAttribute {
    id: i64,
    group_id: i64,
    name: String,
    value_type: AttributeType,
    options: String,
    default_value: Option<String>,
    nullable: bool,
    runtime: bool,
}

impl StoredAttribute {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            name: row.get(2)?,
            value_type: row.get(3)?,
            options: row.get(4)?,
            default_value: row.get(5)?,
            nullable: row.get(6)?,
            runtime: row.get(7)?,
        })
    }

    fn into_attribute(self) -> Result<Attribute> {
        let default = match &self.default_value {
            Some(encoded) => Some(self.value_type.decode(encoded, &self.options).map_err(|e| {
                TensorlabError::internal(format!("stored default of '{}' is malformed: {}", self.name, e))
            })?),
            None => None,
        };
        let mut attribute =
            Attribute::new(self.name, self.value_type, self.runtime).with_options(self.options).nullable(self.nullable);
        attribute.default = default;
        let fields = attribute.fields();
        attribute.set_key(Key::new(self.id, None, self.group_id, fields));
        Ok(attribute)
    }
}

const GROUP_COLUMNS: &str = "id, uid, parent_id, name";
const MODEL_COLUMNS: &str = "id, uid, group_id, name";
const RUN_COLUMNS: &str = "id, uid, model_id, started_at, finished_at";
const ATTRIBUTE_COLUMNS: &str = "id, group_id, name, type, options, default_value, nullable, runtime";

impl<'db> Persistor<'db> {
    pub fn new(connection: &'db Connection) -> Persistor<'db> {
        Persistor { db: connection }
    }

    /// Creates the schema if needed and returns the id of the root group,
    /// creating it on first use.
    pub fn initialize(&self) -> Result<i64> {
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        self.db.execute_batch(
            "
            create table if not exists Groups (
                id integer not null,
                uid text not null,
                parent_id integer null,
                name text not null,
                constraint referenceable_Group_id primary key (
                    id
                ),
                constraint Group_has_parent foreign key (
                    parent_id
                ) references Groups(id),
                constraint unique_Group_uid unique (
                    uid
                ),
                constraint unique_Group_name unique (
                    parent_id,
                    name
                )
            );-- STRICT;
            create table if not exists Models (
                id integer not null,
                uid text not null,
                group_id integer not null,
                name text not null,
                constraint referenceable_Model_id primary key (
                    id
                ),
                constraint Model_in_Group foreign key (
                    group_id
                ) references Groups(id),
                constraint unique_Model_uid unique (
                    uid
                ),
                constraint unique_Model_name unique (
                    group_id,
                    name
                )
            );-- STRICT;
            create table if not exists Runs (
                id integer not null,
                uid text not null,
                model_id integer not null,
                started_at text not null,
                finished_at text null,
                constraint referenceable_Run_id primary key (
                    id
                ),
                constraint Run_of_Model foreign key (
                    model_id
                ) references Models(id),
                constraint unique_Run_uid unique (
                    uid
                )
            );-- STRICT;
            create table if not exists Attributes (
                id integer not null,
                group_id integer not null,
                name text not null,
                type text not null,
                options text not null,
                default_value text null,
                nullable integer not null,
                runtime integer not null,
                constraint referenceable_Attribute_id primary key (
                    id
                ),
                constraint Attribute_defined_on_Group foreign key (
                    group_id
                ) references Groups(id),
                constraint unique_Attribute_name unique (
                    group_id,
                    name
                )
            );-- STRICT;
            create table if not exists AttributeValues (
                id integer not null,
                target_uid text not null,
                attr_id integer not null,
                value text not null,
                constraint referenceable_AttributeValue_id primary key (
                    id
                ),
                constraint AttributeValue_of_Attribute foreign key (
                    attr_id
                ) references Attributes(id),
                constraint unique_AttributeValue unique (
                    target_uid,
                    attr_id
                )
            );-- STRICT;
            create index if not exists AttributeValues_by_attribute on AttributeValues (attr_id);
            create index if not exists Runs_by_start on Runs (model_id, started_at);
            ",
        )?;
        if let Some(id) = self.root_group_id()? {
            return Ok(id);
        }
        self.db.execute(
            "insert into Groups (uid, parent_id, name) values (?1, null, '')",
            params![new_uid()],
        )?;
        let id = self.db.last_insert_rowid();
        self.db.execute("update Groups set parent_id = ?1 where id = ?1", params![id])?;
        Ok(id)
    }

    // ------------- Groups -------------
    pub fn root_group_id(&self) -> Result<Option<i64>> {
        Ok(self
            .db
            .query_row("select id from Groups where id = parent_id", [], |row| row.get(0))
            .optional()?)
    }

    pub fn insert_group(&self, parent_id: i64, name: &str) -> Result<(i64, String)> {
        let uid = new_uid();
        self.db
            .prepare_cached("insert into Groups (uid, parent_id, name) values (?1, ?2, ?3)")?
            .execute(params![uid, parent_id, name])
            .map_err(|e| on_constraint(e, || "Cannot create two subgroups with the same name".to_string()))?;
        Ok((self.db.last_insert_rowid(), uid))
    }

    pub fn group(&self, id: i64) -> Result<Group> {
        self.db
            .prepare_cached(&format!("select {GROUP_COLUMNS} from Groups where id = ?1"))?
            .query_row(params![id], group_from_row)
            .optional()?
            .ok_or_else(|| TensorlabError::internal(format!("group {} does not exist", id)))
    }

    pub fn group_by_name(&self, parent_id: i64, name: &str) -> Result<Option<Group>> {
        Ok(self
            .db
            .prepare_cached(&format!(
                "select {GROUP_COLUMNS} from Groups where parent_id = ?1 and name = ?2 and id != parent_id"
            ))?
            .query_row(params![parent_id, name], group_from_row)
            .optional()?)
    }

    /// Direct subgroups whose name matches a glob pattern (`*` and `?`).
    pub fn child_groups(&self, parent_id: i64, pattern: Option<&str>) -> Result<Vec<Group>> {
        let mut statement = self.db.prepare_cached(&format!(
            "select {GROUP_COLUMNS} from Groups
             where parent_id = ?1 and id != parent_id and name glob ?2
             order by id"
        ))?;
        let groups = statement
            .query_map(params![parent_id, pattern.unwrap_or("*")], group_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn child_group_ids(&self, parent_id: i64) -> Result<Vec<i64>> {
        let mut statement =
            self.db.prepare_cached("select id from Groups where parent_id = ?1 and id != parent_id order by id")?;
        let ids = statement.query_map(params![parent_id], |row| row.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// The group and all groups below it, parents before children.
    pub fn subtree(&self, group_id: i64) -> Result<Vec<i64>> {
        let mut ids = vec![group_id];
        let mut next = 0;
        while next < ids.len() {
            let children = self.child_group_ids(ids[next])?;
            ids.extend(children);
            next += 1;
        }
        Ok(ids)
    }

    pub fn rename_group(&self, id: i64, name: &str) -> Result<()> {
        self.db
            .prepare_cached("update Groups set name = ?2 where id = ?1")?
            .execute(params![id, name])
            .map_err(|e| on_constraint(e, || format!("A group named '{}' already exists here", name)))?;
        Ok(())
    }

    pub fn delete_group(&self, id: i64) -> Result<()> {
        self.db.prepare_cached("delete from Groups where id = ?1")?.execute(params![id])?;
        Ok(())
    }

    // ------------- Models -------------
    pub fn insert_model(&self, group_id: i64, name: &str) -> Result<(i64, String)> {
        let uid = new_uid();
        self.db
            .prepare_cached("insert into Models (uid, group_id, name) values (?1, ?2, ?3)")?
            .execute(params![uid, group_id, name])
            .map_err(|e| on_constraint(e, || format!("Cannot create two models named '{}' in one group", name)))?;
        Ok((self.db.last_insert_rowid(), uid))
    }

    pub fn model(&self, id: i64) -> Result<Model> {
        self.db
            .prepare_cached(&format!("select {MODEL_COLUMNS} from Models where id = ?1"))?
            .query_row(params![id], model_from_row)
            .optional()?
            .ok_or_else(|| TensorlabError::internal(format!("model {} does not exist", id)))
    }

    pub fn model_by_name(&self, group_id: i64, name: &str) -> Result<Option<Model>> {
        Ok(self
            .db
            .prepare_cached(&format!("select {MODEL_COLUMNS} from Models where group_id = ?1 and name = ?2"))?
            .query_row(params![group_id, name], model_from_row)
            .optional()?)
    }

    pub fn models_in_group(&self, group_id: i64, pattern: Option<&str>) -> Result<Vec<Model>> {
        let mut statement = self.db.prepare_cached(&format!(
            "select {MODEL_COLUMNS} from Models where group_id = ?1 and name glob ?2 order by id"
        ))?;
        let models = statement
            .query_map(params![group_id, pattern.unwrap_or("*")], model_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    pub fn count_models(&self, group_id: i64) -> Result<usize> {
        let n: i64 = self
            .db
            .prepare_cached("select count(*) from Models where group_id = ?1")?
            .query_row(params![group_id], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn model_uids(&self, group_id: i64) -> Result<Vec<String>> {
        let mut statement = self.db.prepare_cached("select uid from Models where group_id = ?1")?;
        let uids = statement.query_map(params![group_id], |row| row.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uids)
    }

    pub fn rename_model(&self, id: i64, name: &str) -> Result<()> {
        self.db
            .prepare_cached("update Models set name = ?2 where id = ?1")?
            .execute(params![id, name])
            .map_err(|e| on_constraint(e, || format!("A model named '{}' already exists in this group", name)))?;
        Ok(())
    }

    pub fn delete_model(&self, id: i64) -> Result<()> {
        self.db.prepare_cached("delete from Models where id = ?1")?.execute(params![id])?;
        Ok(())
    }

    // ------------- Runs -------------
    pub fn insert_run(
        &self,
        model_id: i64,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(i64, String)> {
        let uid = new_uid();
        self.db
            .prepare_cached("insert into Runs (uid, model_id, started_at, finished_at) values (?1, ?2, ?3, ?4)")?
            .execute(params![uid, model_id, started_at, finished_at])?;
        Ok((self.db.last_insert_rowid(), uid))
    }

    pub fn runs_of_model(&self, model_id: i64) -> Result<Vec<Run>> {
        let mut statement = self.db.prepare_cached(&format!(
            "select {RUN_COLUMNS} from Runs where model_id = ?1 order by started_at, id"
        ))?;
        let runs = statement.query_map(params![model_id], run_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn run_at(&self, model_id: i64, index: usize) -> Result<Option<Run>> {
        let Ok(offset) = i64::try_from(index) else {
            return Ok(None);
        };
        Ok(self
            .db
            .prepare_cached(&format!(
                "select {RUN_COLUMNS} from Runs where model_id = ?1 order by started_at, id limit 1 offset ?2"
            ))?
            .query_row(params![model_id, offset], run_from_row)
            .optional()?)
    }

    pub fn count_runs(&self, model_id: i64) -> Result<usize> {
        let n: i64 = self
            .db
            .prepare_cached("select count(*) from Runs where model_id = ?1")?
            .query_row(params![model_id], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn count_runs_in_group(&self, group_id: i64) -> Result<usize> {
        let n: i64 = self
            .db
            .prepare_cached("select count(*) from Runs r join Models m on r.model_id = m.id where m.group_id = ?1")?
            .query_row(params![group_id], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn run_uids_in_group(&self, group_id: i64) -> Result<Vec<String>> {
        let mut statement = self
            .db
            .prepare_cached("select r.uid from Runs r join Models m on r.model_id = m.id where m.group_id = ?1")?;
        let uids = statement.query_map(params![group_id], |row| row.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uids)
    }

    pub fn update_run_times(
        &self,
        id: i64,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.db
            .prepare_cached("update Runs set started_at = ?2, finished_at = ?3 where id = ?1")?
            .execute(params![id, started_at, finished_at])?;
        Ok(())
    }

    pub fn delete_run(&self, id: i64) -> Result<()> {
        self.db.prepare_cached("delete from Runs where id = ?1")?.execute(params![id])?;
        Ok(())
    }

    // ------------- Attributes -------------
    pub fn insert_attribute(&self, group_id: i64, attribute: &Attribute, default_value: Option<&str>) -> Result<i64> {
        self.db
            .prepare_cached(
                "insert into Attributes (group_id, name, type, options, default_value, nullable, runtime)
                 values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                group_id,
                attribute.name,
                attribute.value_type,
                attribute.options,
                default_value,
                attribute.nullable,
                attribute.runtime
            ])
            .map_err(|e| {
                on_constraint(e, || format!("Attribute '{}' is already defined on this group", attribute.name))
            })?;
        Ok(self.db.last_insert_rowid())
    }

    pub fn attribute_by_name(&self, group_id: i64, name: &str) -> Result<Option<Attribute>> {
        self.db
            .prepare_cached(&format!("select {ATTRIBUTE_COLUMNS} from Attributes where group_id = ?1 and name = ?2"))?
            .query_row(params![group_id, name], StoredAttribute::from_row)
            .optional()?
            .map(StoredAttribute::into_attribute)
            .transpose()
    }

    pub fn attributes_of_group(&self, group_id: i64) -> Result<Vec<Attribute>> {
        let mut statement =
            self.db.prepare_cached(&format!("select {ATTRIBUTE_COLUMNS} from Attributes where group_id = ?1 order by id"))?;
        let stored = statement
            .query_map(params![group_id], StoredAttribute::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stored.into_iter().map(StoredAttribute::into_attribute).collect()
    }

    pub fn update_attribute(&self, id: i64, options: &str, default_value: Option<&str>, nullable: bool) -> Result<()> {
        self.db
            .prepare_cached("update Attributes set options = ?2, default_value = ?3, nullable = ?4 where id = ?1")?
            .execute(params![id, options, default_value, nullable])?;
        Ok(())
    }

    pub fn delete_attribute(&self, id: i64) -> Result<()> {
        self.db.prepare_cached("delete from Attributes where id = ?1")?.execute(params![id])?;
        Ok(())
    }

    // ------------- Attribute values -------------
    pub fn insert_value(&self, target_uid: &str, attr_id: i64, value: &str) -> Result<()> {
        self.db
            .prepare_cached(
                "insert into AttributeValues (target_uid, attr_id, value) values (?1, ?2, ?3)
                 on conflict (target_uid, attr_id) do update set value = excluded.value",
            )?
            .execute(params![target_uid, attr_id, value])?;
        Ok(())
    }

    /// Encoded values stored for one model or run, keyed by attribute id.
    pub fn values_of_target(&self, target_uid: &str) -> Result<HashMap<i64, String>> {
        let mut statement = self.db.prepare_cached("select attr_id, value from AttributeValues where target_uid = ?1")?;
        let values = statement
            .query_map(params![target_uid], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(values)
    }

    /// `(target_uid, encoded value)` for every value stored for an attribute.
    pub fn values_of_attribute(&self, attr_id: i64) -> Result<Vec<(String, String)>> {
        let mut statement = self.db.prepare_cached("select target_uid, value from AttributeValues where attr_id = ?1")?;
        let values = statement
            .query_map(params![attr_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    pub fn delete_values_of_target(&self, target_uid: &str) -> Result<usize> {
        Ok(self
            .db
            .prepare_cached("delete from AttributeValues where target_uid = ?1")?
            .execute(params![target_uid])?)
    }

    pub fn delete_values_of_attribute(&self, attr_id: i64) -> Result<usize> {
        Ok(self.db.prepare_cached("delete from AttributeValues where attr_id = ?1")?.execute(params![attr_id])?)
    }
}
