mod common;

use chrono::{TimeZone, Utc};
use common::{Fixture, attrs, names, string_attr};
use tensorlab::{Attribute, AttributeType, Model, Run, TensorlabError, Value};

#[test]
fn create_in_group() {
    let fixture = Fixture::new();
    let group = fixture.group("grp", None);
    let mut model = Model::new("mdl");
    let data_path = fixture.storage.models().create(&mut model, Some(&group), &attrs(&[])).expect("create");

    assert!(model.is_saved());
    assert!(data_path.is_dir());
    assert!(data_path.starts_with(fixture.root()));
    let calls = fixture.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].stage, "build");
    assert_eq!(calls[0].model_data, data_path);

    let groups = fixture.storage.groups();
    assert!(groups.list_models(None, None, None).unwrap().is_empty());
    assert_eq!(groups.list_models(Some(&group), None, None).unwrap(), vec![model.clone()]);
    assert_eq!(fixture.storage.models().get(Some(&group), "mdl").unwrap(), model);
    assert_eq!(fixture.storage.models().get_group(&model).unwrap(), group);
    assert_eq!(fixture.storage.models().get_data_path(&model).unwrap(), data_path);
}

#[test]
fn create_in_root_group() {
    let fixture = Fixture::new();
    let model = fixture.model(None, "mdl", &[]);
    assert_eq!(fixture.storage.groups().list_models(None, None, None).unwrap(), vec![model.clone()]);
    assert!(fixture.storage.models().get_group(&model).unwrap().is_root());
}

#[test]
fn lookup_of_missing_model() {
    let fixture = Fixture::new();
    match fixture.storage.models().get(None, "nothing") {
        Err(TensorlabError::Lookup(message)) => assert_eq!(message, "Model named 'nothing' not found"),
        other => panic!("expected a lookup error, got {other:?}"),
    }
}

#[test]
fn duplicate_names_are_rejected() {
    let fixture = Fixture::new();
    fixture.model(None, "mdl", &[]);
    let mut twin = Model::new("mdl");
    assert!(matches!(
        fixture.storage.models().create(&mut twin, None, &attrs(&[])),
        Err(TensorlabError::InvalidState(_))
    ));
    assert_eq!(fixture.calls().len(), 1, "no build for a rejected model");
}

#[test]
fn build_receives_effective_values() {
    let fixture = Fixture::new();
    let group = fixture.group("grp", None);
    fixture.attr(None, Attribute::new("lr", AttributeType::Float, false).with_default(0.1));
    fixture.attr(Some(&group), Attribute::new("depth", AttributeType::Integer, false).with_options("positive"));
    fixture.attr(Some(&group), string_attr("note").nullable(true));
    fixture.attr(Some(&group), Attribute::new("seed", AttributeType::Integer, true));

    fixture.model(Some(&group), "mdl", &[("depth", Value::from("12"))]);
    let calls = fixture.calls();
    let seen = &calls[0].attributes;
    assert_eq!(seen.len(), 3);
    assert_eq!(seen["lr"], Some(Value::Float(0.1)));
    assert_eq!(seen["depth"], Some(Value::Integer(12)));
    assert_eq!(seen["note"], None);
}

#[test]
fn invalid_values_create_nothing() {
    let fixture = Fixture::new();
    fixture.attr(None, Attribute::new("depth", AttributeType::Integer, false).with_options("positive"));
    for values in [vec![], vec![("depth", Value::from(-1))], vec![("depth", Value::from(1)), ("other", Value::from(1))]] {
        let mut model = Model::new("mdl");
        let result = fixture.storage.models().create(&mut model, None, &attrs(&values));
        assert!(matches!(result, Err(TensorlabError::IllegalArgument(_))), "{values:?}");
        assert!(!model.is_saved());
    }
    assert!(fixture.calls().is_empty());
    assert_eq!(fixture.storage.groups().count_models(None).unwrap(), 0);
}

#[test]
fn failed_build_rolls_back() {
    let fixture = Fixture::new();
    fixture.project.fail.set(true);
    let mut model = Model::new("mdl");
    let result = fixture.storage.models().create(&mut model, None, &attrs(&[]));
    assert!(matches!(result, Err(TensorlabError::Hook(_))));
    assert!(!model.is_saved());
    assert_eq!(fixture.storage.groups().count_models(None).unwrap(), 0);
    let built_in = fixture.calls()[0].model_data.clone();
    assert!(!built_in.exists(), "data directory of a failed build is removed");

    fixture.project.fail.set(false);
    fixture.storage.models().create(&mut model, None, &attrs(&[])).expect("name is free again");
}

#[test]
fn renaming() {
    let fixture = Fixture::new();
    let group = fixture.group("grp", None);
    let mut model = fixture.model(Some(&group), "original-name", &[]);
    model.name = "new-name".into();
    fixture.storage.models().rename(&mut model).expect("rename");
    assert!(model.get_dirty().is_empty());
    assert_eq!(names(&fixture.storage.models().list(Some(&group), None, None).unwrap()), ["new-name"]);
    assert_eq!(fixture.calls().len(), 1, "renaming does not rebuild");
}

#[test]
fn set_values_replaces_stored_values() {
    let fixture = Fixture::new();
    fixture.attr(None, Attribute::new("depth", AttributeType::Integer, false));
    fixture.attr(None, string_attr("note").nullable(true));
    let model = fixture.model(None, "mdl", &[("depth", Value::from(3))]);
    let attributes = fixture.storage.attributes();
    assert_eq!(attributes.get_attr_values_for_model(&model).unwrap()["depth"], Some(Value::Integer(3)));

    fixture
        .storage
        .models()
        .set_values(&model, &attrs(&[("depth", Value::from(4)), ("note", Value::from("tuned"))]))
        .expect("set values");
    let values = attributes.get_attr_values_for_model(&model).unwrap();
    assert_eq!(values["depth"], Some(Value::Integer(4)));
    assert_eq!(values["note"], Some(Value::from("tuned")));

    assert!(fixture.storage.models().set_values(&model, &attrs(&[("depth", Value::from("x"))])).is_err());
    assert_eq!(attributes.get_attr_values_for_model(&model).unwrap()["depth"], Some(Value::Integer(4)));
}

#[test]
fn list_and_count_runs() {
    let fixture = Fixture::new();
    let model = fixture.model(None, "mdl", &[]);
    let at = |seconds| Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp");
    let mut created = Vec::new();
    for seconds in [5, 1, 2] {
        let mut run = Run::started_at(at(seconds));
        fixture.storage.runs().create(&model, &mut run, &attrs(&[])).expect("run");
        created.push(run);
    }
    let listed = fixture.storage.models().list_runs(&model, None).unwrap();
    assert_eq!(listed, vec![created[1].clone(), created[2].clone(), created[0].clone()]);
    assert_eq!(fixture.storage.models().count_runs(&model).unwrap(), 3);
}

#[test]
fn delete_needs_force_when_runs_exist() {
    let fixture = Fixture::new();
    let mut model = fixture.model(None, "mdl", &[]);
    let data_path = fixture.storage.models().get_data_path(&model).unwrap();
    let run = fixture.run(&model, &[]);
    let run_path = fixture.storage.runs().get_data_path(&run).unwrap();

    match model.delete(&fixture.storage, false) {
        Err(TensorlabError::InvalidState(message)) => assert!(message.contains("run 1 times"), "{message}"),
        other => panic!("expected an invalid state error, got {other:?}"),
    }
    fixture.storage.models().delete_with_content(&mut model).expect("delete");
    assert!(!model.is_saved());
    assert!(fixture.storage.models().list(None, None, None).unwrap().is_empty());
    assert!(!data_path.exists());
    assert!(!run_path.exists());
}

#[test]
fn model_without_runs_is_deleted_without_force() {
    let fixture = Fixture::new();
    let mut model = fixture.model(None, "mdl", &[]);
    model.delete(&fixture.storage, false).expect("delete");
    assert_eq!(fixture.storage.groups().count_models(None).unwrap(), 0);
}
