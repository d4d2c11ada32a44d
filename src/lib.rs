//! Tensorlab – a metadata manager for machine-learning experiments.
//!
//! Tensorlab keeps track of what was trained, with which settings, and how
//! often it was executed. Its data model is a small hierarchy:
//! * A [`Group`] is a named folder. Groups nest; every storage has one root group.
//! * A [`Model`] lives in a group and stands for one trained artifact.
//! * A [`Run`] is one execution of a model, stamped with its start and finish time.
//! * An [`Attribute`] is a typed parameter defined on a group. It applies to the
//!   models of that group and all groups below it (or to their runs, for runtime
//!   attributes) unless a subgroup defines an attribute of the same name.
//!
//! Values are typed by [`AttributeType`]: integers, floats, strings and enums.
//! Integers can be narrowed to `"positive"` or `"negative"`; enums list their
//! choices, e.g. `"adam;sgd"`.
//!
//! ## Modules
//! * [`storage`] – The [`Storage`] context: one SQLite database plus the model
//!   and run data directories, created or opened explicitly.
//! * [`groups`], [`models`], [`runs`], [`attributes`] – Repositories reached
//!   through [`Storage::groups`] and friends.
//! * [`integrity`] – The rules that keep definitions and stored values consistent.
//! * [`predicate`] – The filter expression language, e.g. `lr < 0.01 and not optimizer == "sgd"`.
//! * [`filter`] – Type checks a parsed expression and evaluates it against attribute values.
//! * [`persist`] – SQLite schema and row level access.
//! * [`project`] – The [`UserProject`] hook that builds models and executes runs.
//! * [`settings`] – Layered settings of a storage root.
//!
//! ## Quick Start
//! ```
//! use tensorlab::{Attribute, AttributeInput, AttributeType, Group, Model, NoProject, Storage, Value};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let storage = Storage::create(dir.path().join(".tensorlab"), Box::new(NoProject), Box::new(std::io::sink())).unwrap();
//!
//! let mut mnist = Group::new("mnist");
//! storage.groups().create(&mut mnist, None).unwrap();
//! let mut lr = Attribute::new("lr", AttributeType::Float, false);
//! storage.attributes().create(&mut lr, Some(&mnist)).unwrap();
//!
//! let mut model = Model::new("baseline");
//! let attrs = AttributeInput::from([("lr".to_string(), Value::from(0.001))]);
//! storage.models().create(&mut model, Some(&mnist), &attrs).unwrap();
//!
//! let small_lr = tensorlab::parse_expression("lr < 0.01").unwrap();
//! let found = storage.models().list(Some(&mnist), None, Some(&small_lr)).unwrap();
//! assert_eq!(found, vec![model]);
//! ```
//!
//! ## Errors
//! Every fallible operation returns [`Result`], whose error type
//! [`TensorlabError`] separates invalid input from operations that are not
//! allowed in the current state and from lookups that found nothing.

pub mod attributes;
pub mod datatype;
pub mod entity;
pub mod error;
pub mod files;
pub mod filter;
pub mod groups;
pub mod integrity;
pub mod models;
pub mod persist;
pub mod predicate;
pub mod project;
pub mod runs;
pub mod settings;
pub mod storage;

pub use datatype::{AttributeTarget, AttributeType, Value};
pub use entity::{Attribute, AttributeInput, AttributeValues, Group, Model, Run};
pub use error::{Result, TensorlabError};
pub use filter::Filter;
pub use predicate::{Expression, Op, parse_expression};
pub use project::{CommandProject, NoProject, UserProject};
pub use settings::Settings;
pub use storage::Storage;
