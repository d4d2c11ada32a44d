#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;
use tensorlab::{
    Attribute, AttributeInput, AttributeType, AttributeValues, Group, Model, Result, Run, Storage, TensorlabError,
    UserProject, Value,
};

#[derive(Debug, Clone)]
pub struct Call {
    pub stage: &'static str,
    pub attributes: AttributeValues,
    pub model_data: PathBuf,
    pub run_data: Option<PathBuf>,
}

/// Records every hook invocation and fails on demand.
#[derive(Clone, Default)]
pub struct RecordingProject {
    pub calls: Rc<RefCell<Vec<Call>>>,
    pub fail: Rc<Cell<bool>>,
}

impl RecordingProject {
    fn record(&self, call: Call, log: &mut dyn Write) -> Result<()> {
        writeln!(log, "{} {}", call.stage, call.model_data.display())?;
        self.calls.borrow_mut().push(call);
        if self.fail.get() {
            return Err(TensorlabError::hook("requested failure"));
        }
        Ok(())
    }
}

impl UserProject for RecordingProject {
    fn build(&self, attributes: &AttributeValues, model_data: &Path, log: &mut dyn Write) -> Result<()> {
        let call = Call {
            stage: "build",
            attributes: attributes.clone(),
            model_data: model_data.to_path_buf(),
            run_data: None,
        };
        self.record(call, log)
    }

    fn run(
        &self,
        attributes: &AttributeValues,
        model_data: &Path,
        run_data: &Path,
        log: &mut dyn Write,
    ) -> Result<()> {
        let call = Call {
            stage: "run",
            attributes: attributes.clone(),
            model_data: model_data.to_path_buf(),
            run_data: Some(run_data.to_path_buf()),
        };
        self.record(call, log)
    }
}

/// A fresh storage in a temporary directory.
pub struct Fixture {
    pub storage: Storage,
    pub project: RecordingProject,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = RecordingProject::default();
        let storage = Storage::create(root_of(&dir), Box::new(project.clone()), Box::new(std::io::sink()))
            .expect("create storage");
        Fixture { storage, project, dir }
    }

    pub fn root(&self) -> PathBuf {
        root_of(&self.dir)
    }

    pub fn group(&self, name: &str, parent: Option<&Group>) -> Group {
        let mut group = Group::new(name);
        self.storage.groups().create(&mut group, parent).expect("create group");
        group
    }

    pub fn attr(&self, group: Option<&Group>, attribute: Attribute) -> Attribute {
        let mut attribute = attribute;
        self.storage.attributes().create(&mut attribute, group).expect("create attribute");
        attribute
    }

    pub fn model(&self, group: Option<&Group>, name: &str, values: &[(&str, Value)]) -> Model {
        let mut model = Model::new(name);
        self.storage.models().create(&mut model, group, &attrs(values)).expect("create model");
        model
    }

    pub fn run(&self, model: &Model, values: &[(&str, Value)]) -> Run {
        let mut run = Run::new();
        self.storage.runs().create(model, &mut run, &attrs(values)).expect("create run");
        run
    }

    pub fn calls(&self) -> Vec<Call> {
        self.project.calls.borrow().clone()
    }
}

pub fn root_of(dir: &TempDir) -> PathBuf {
    dir.path().join(".tensorlab")
}

pub fn attrs(values: &[(&str, Value)]) -> AttributeInput {
    values.iter().map(|(name, value)| (name.to_string(), value.clone())).collect()
}

pub fn string_attr(name: &str) -> Attribute {
    Attribute::new(name, AttributeType::String, false)
}

pub fn names(models: &[Model]) -> Vec<&str> {
    models.iter().map(|m| m.name.as_str()).collect()
}
