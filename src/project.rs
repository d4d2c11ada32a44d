//! The user's project: what actually builds a model and executes a run.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::entity::AttributeValues;
use crate::error::{Result, TensorlabError};

/// Invoked synchronously while a model or run is being created. An error
/// aborts the creation.
pub trait UserProject {
    fn build(&self, attributes: &AttributeValues, model_data: &Path, log: &mut dyn Write) -> Result<()>;

    fn run(
        &self,
        attributes: &AttributeValues,
        model_data: &Path,
        run_data: &Path,
        log: &mut dyn Write,
    ) -> Result<()>;
}

/// A project that only records metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProject;

impl UserProject for NoProject {
    fn build(&self, _attributes: &AttributeValues, _model_data: &Path, _log: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn run(&self, _attributes: &AttributeValues, _model_data: &Path, _run_data: &Path, _log: &mut dyn Write) -> Result<()> {
        Ok(())
    }
}

/// Runs shell commands for build and run. Attribute values are passed as a
/// JSON object in `TENSORLAB_ATTRIBUTES`, data directories in
/// `TENSORLAB_MODEL_DATA` and `TENSORLAB_RUN_DATA`.
#[derive(Debug, Default, Clone)]
pub struct CommandProject {
    build: Option<String>,
    run: Option<String>,
}

impl CommandProject {
    pub fn new(build: Option<String>, run: Option<String>) -> Self {
        Self { build, run }
    }

    fn execute(&self, stage: &str, command: &str, envs: &[(&str, String)], log: &mut dyn Write) -> Result<()> {
        debug!(stage, command, "invoking project hook");
        let output = Command::new("sh").arg("-c").arg(command).envs(envs.iter().cloned()).output()?;
        log.write_all(&output.stdout)?;
        log.write_all(&output.stderr)?;
        log.flush()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TensorlabError::hook(format!("{} command `{}` exited with {}", stage, command, output.status)))
        }
    }
}

impl UserProject for CommandProject {
    fn build(&self, attributes: &AttributeValues, model_data: &Path, log: &mut dyn Write) -> Result<()> {
        let Some(command) = &self.build else {
            return Ok(());
        };
        let envs = [
            ("TENSORLAB_ATTRIBUTES", serde_json::to_string(attributes)?),
            ("TENSORLAB_MODEL_DATA", model_data.display().to_string()),
        ];
        self.execute("build", command, &envs, log)
    }

    fn run(
        &self,
        attributes: &AttributeValues,
        model_data: &Path,
        run_data: &Path,
        log: &mut dyn Write,
    ) -> Result<()> {
        let Some(command) = &self.run else {
            return Ok(());
        };
        let envs = [
            ("TENSORLAB_ATTRIBUTES", serde_json::to_string(attributes)?),
            ("TENSORLAB_MODEL_DATA", model_data.display().to_string()),
            ("TENSORLAB_RUN_DATA", run_data.display().to_string()),
        ];
        self.execute("run", command, &envs, log)
    }
}
