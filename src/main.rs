//! Command line front end of a tensorlab storage.
//!
//! The storage root is taken from `--root`, the `TENSORLAB_ROOT` environment
//! variable, or the nearest `.tensorlab` directory above the working directory.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tensorlab::settings::{self, ROOT_MARKER};
use tensorlab::{
    Attribute, AttributeInput, AttributeType, AttributeValues, CommandProject, Group, Model, Result, Run, Settings,
    Storage, TensorlabError, Value, parse_expression,
};

#[derive(Parser)]
#[command(name = "tensorlab", version, author, about = "Metadata manager for machine-learning experiments")]
struct Cli {
    /// Storage root directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new storage (in ./.tensorlab unless --root is given)
    Init,
    /// Print the group tree with model and run counts
    Show,
    #[command(subcommand)]
    Group(GroupCommand),
    #[command(subcommand)]
    Model(ModelCommand),
    #[command(subcommand)]
    Run(RunCommand),
}

#[derive(Subcommand)]
enum GroupCommand {
    /// Create a group; `a/b` creates `b` inside the existing group `a`
    Create { path: String },
    /// Show attributes, subgroups and models of a group (the root by default)
    Show { path: Option<String> },
    Rename { path: String, new_name: String },
    Delete {
        path: String,
        /// Also delete subgroups, models and runs
        #[arg(long)]
        delete_all_content: bool,
    },
    /// Define or update an attribute on a group
    DefAttr(DefAttrArgs),
    /// Remove an attribute and all of its values
    RemAttr { path: String, name: String },
}

#[derive(Args)]
struct DefAttrArgs {
    /// Group path, empty for the root group
    path: String,
    name: String,
    #[arg(long = "type", default_value = "String")]
    value_type: String,
    #[arg(long, default_value = "")]
    options: String,
    #[arg(long)]
    default: Option<String>,
    #[arg(long)]
    nullable: bool,
    /// Values are given per run instead of per model
    #[arg(long)]
    runtime: bool,
}

#[derive(Args)]
struct AttrArgs {
    /// Attribute value as key=value, repeatable
    #[arg(long = "attr", value_parser = parse_assignment)]
    attrs: Vec<(String, String)>,
}

impl AttrArgs {
    fn input(&self) -> AttributeInput {
        self.attrs.iter().map(|(key, value)| (key.clone(), Value::from(value.as_str()))).collect()
    }
}

#[derive(Subcommand)]
enum ModelCommand {
    /// Create a model and let the project build it
    Create {
        group: String,
        name: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    Show { group: String, name: String },
    /// Change attribute values of a model
    Set {
        group: String,
        name: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    Remove {
        group: String,
        name: String,
        /// Also delete the runs of the model
        #[arg(long)]
        delete_runs: bool,
    },
    List {
        group: Option<String>,
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Subcommand)]
enum RunCommand {
    /// Execute a model through the project and record the run
    Create {
        group: String,
        model: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    List {
        group: String,
        model: String,
        #[arg(long)]
        filter: Option<String>,
    },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    // a second initialization only happens in tests and is harmless
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn execute(cli: Cli) -> Result<()> {
    if let Command::Init = cli.command {
        init_logging(&Settings::default().log_filter);
        let root = cli.root.unwrap_or_else(|| PathBuf::from(ROOT_MARKER));
        let storage = Storage::create(&root, Box::new(CommandProject::default()), Box::new(io::stderr()))?;
        Settings::write_template(&root)?;
        storage.close()?;
        println!("Created storage at {}", root.display());
        return Ok(());
    }

    let root = match cli.root {
        Some(root) => root,
        None => settings::find_root(&env::current_dir()?)?,
    };
    let settings = Settings::load(&root)?;
    init_logging(&settings.log_filter);
    debug!(root = %root.display(), "opening storage");
    let project = CommandProject::new(settings.project.build, settings.project.run);
    let storage = Storage::open(&root, Box::new(project), Box::new(io::stderr()))?;
    match cli.command {
        Command::Init => Ok(()),
        Command::Show => show_tree(&storage, None, 0),
        Command::Group(command) => group_command(&storage, command),
        Command::Model(command) => model_command(&storage, command),
        Command::Run(command) => run_command(&storage, command),
    }?;
    storage.close()
}

// ------------- Groups -------------
fn group(storage: &Storage, path: &str) -> Result<Group> {
    storage.groups().get(Some(path))
}

fn group_command(storage: &Storage, command: GroupCommand) -> Result<()> {
    let groups = storage.groups();
    match command {
        GroupCommand::Create { path } => {
            let path = path.trim_matches('/');
            let (parent, name) = match path.rsplit_once('/') {
                Some((parent, name)) => (Some(group(storage, parent)?), name),
                None => (None, path),
            };
            let mut created = Group::new(name);
            groups.create(&mut created, parent.as_ref())?;
            println!("Created group {}", groups.qualified_name(&created)?);
        }
        GroupCommand::Show { path } => {
            let shown = groups.get(path.as_deref())?;
            println!("Group: /{}", groups.qualified_name(&shown)?);
            println!("Attributes:");
            for attribute in storage.attributes().list_effective(Some(&shown))? {
                let defining = storage.attributes().get_defining_group(&attribute)?;
                println!("  {} (from /{})", attribute, groups.qualified_name(&defining)?);
            }
            println!("Subgroups:");
            for child in groups.list(Some(&shown), None)? {
                println!("  {}", child.name);
            }
            println!("Models:");
            for model in groups.list_models(Some(&shown), None, None)? {
                println!("  {}", model.name);
            }
        }
        GroupCommand::Rename { path, new_name } => {
            let mut renamed = group(storage, &path)?;
            renamed.name = new_name;
            groups.rename(&mut renamed)?;
            println!("Renamed group to {}", groups.qualified_name(&renamed)?);
        }
        GroupCommand::Delete { path, delete_all_content } => {
            let mut deleted = group(storage, &path)?;
            deleted.delete(storage, delete_all_content)?;
            println!("Deleted group {}", path);
        }
        GroupCommand::DefAttr(args) => {
            let owner = group(storage, &args.path)?;
            let value_type: AttributeType = args.value_type.parse()?;
            let mut attribute = match storage.attributes().get(Some(&owner), &args.name) {
                Ok(existing) => existing,
                Err(TensorlabError::Lookup(_)) => Attribute::new(&args.name, value_type, args.runtime),
                Err(e) => return Err(e),
            };
            attribute.value_type = value_type;
            attribute.runtime = args.runtime;
            attribute.options = args.options;
            attribute.default = args.default.map(Value::from);
            attribute.nullable = args.nullable;
            attribute.save(storage, Some(&owner))?;
            let (with_value, in_scope) = storage.attributes().usage_stats(&attribute)?;
            println!("Defined {} ({} of {} entities have a value)", attribute, with_value, in_scope);
        }
        GroupCommand::RemAttr { path, name } => {
            let owner = group(storage, &path)?;
            let mut attribute = storage.attributes().get(Some(&owner), &name)?;
            let removed = attribute.delete(storage)?;
            println!("Removed attribute {} and {} values", name, removed);
        }
    }
    Ok(())
}

fn show_tree(storage: &Storage, parent: Option<&Group>, depth: usize) -> Result<()> {
    let groups = storage.groups();
    if parent.is_none() {
        println!("/ ({} models)", groups.count_models(None)?);
    }
    for child in groups.list(parent, None)? {
        println!(
            "{}{} ({} models, {} runs)",
            "  ".repeat(depth + 1),
            child.name,
            groups.count_models(Some(&child))?,
            groups.count_runs(Some(&child))?
        );
        show_tree(storage, Some(&child), depth + 1)?;
    }
    Ok(())
}

// ------------- Models and runs -------------
fn model(storage: &Storage, group_path: &str, name: &str) -> Result<Model> {
    let owner = group(storage, group_path)?;
    storage.models().get(Some(&owner), name)
}

fn print_values(values: &AttributeValues) {
    for (name, value) in values {
        match value {
            Some(value) => println!("  {} = {}", name, value),
            None => println!("  {} = null", name),
        }
    }
}

fn parse_filter(filter: Option<&str>) -> Result<Option<tensorlab::Expression>> {
    filter
        .map(|text| {
            parse_expression(text)
                .ok_or_else(|| TensorlabError::illegal_argument(format!("Cannot parse filter '{}'", text)))
        })
        .transpose()
}

fn model_command(storage: &Storage, command: ModelCommand) -> Result<()> {
    let models = storage.models();
    match command {
        ModelCommand::Create { group: path, name, attrs } => {
            let owner = group(storage, &path)?;
            let mut created = Model::new(name);
            let data = models.create(&mut created, Some(&owner), &attrs.input())?;
            println!("Created {} with data in {}", created, data.display());
        }
        ModelCommand::Show { group: path, name } => {
            let shown = model(storage, &path, &name)?;
            println!("{}", shown);
            println!("Data: {}", models.get_data_path(&shown)?.display());
            println!("Runs: {}", models.count_runs(&shown)?);
            println!("Attributes:");
            print_values(&storage.attributes().get_attr_values_for_model(&shown)?);
        }
        ModelCommand::Set { group: path, name, attrs } => {
            let changed = model(storage, &path, &name)?;
            models.set_values(&changed, &attrs.input())?;
            println!("Updated {}", changed);
        }
        ModelCommand::Remove { group: path, name, delete_runs } => {
            let mut removed = model(storage, &path, &name)?;
            removed.delete(storage, delete_runs)?;
            println!("Removed model {}", name);
        }
        ModelCommand::List { group: path, filter } => {
            let owner = storage.groups().get(path.as_deref())?;
            let predicate = parse_filter(filter.as_deref())?;
            for listed in models.list(Some(&owner), None, predicate.as_ref())? {
                println!("{}", listed.name);
            }
        }
    }
    Ok(())
}

fn run_command(storage: &Storage, command: RunCommand) -> Result<()> {
    match command {
        RunCommand::Create { group: path, model: name, attrs } => {
            let executed = model(storage, &path, &name)?;
            let mut run = Run::new();
            let data = storage.runs().create(&executed, &mut run, &attrs.input())?;
            println!("Recorded {} with data in {}", run, data.display());
        }
        RunCommand::List { group: path, model: name, filter } => {
            let executed = model(storage, &path, &name)?;
            let predicate = parse_filter(filter.as_deref())?;
            for (index, run) in storage.runs().list(&executed, predicate.as_ref())?.iter().enumerate() {
                println!("#{} {}", index, run);
                print_values(&storage.attributes().get_attr_values_for_run(run)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_at_the_first_equals_sign() {
        assert_eq!(parse_assignment("lr=0.1").unwrap(), ("lr".to_string(), "0.1".to_string()));
        assert_eq!(parse_assignment("expr=a=b").unwrap(), ("expr".to_string(), "a=b".to_string()));
        assert!(parse_assignment("lr").is_err());
    }

    #[test]
    fn command_line_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_author(), Some(env!("CARGO_PKG_AUTHORS")));
    }

    #[test]
    fn nested_commands_parse() {
        let cli = Cli::try_parse_from([
            "tensorlab", "--root", "/tmp/x", "model", "create", "mnist", "base", "--attr", "lr=0.1", "--attr", "depth=3",
        ])
        .unwrap();
        let Command::Model(ModelCommand::Create { attrs, .. }) = cli.command else {
            panic!("expected model create");
        };
        assert_eq!(attrs.input().len(), 2);
    }
}
