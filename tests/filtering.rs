mod common;

use common::Fixture;
use tensorlab::{Attribute, AttributeType, Model, Run, TensorlabError, Value, parse_expression};

/// Models in the root group or runs of a single model, filtered the same way.
trait Objects {
    type Object: Clone + PartialEq + std::fmt::Debug;
    fn runtime() -> bool;
    fn make(&self, fixture: &Fixture, values: Vec<(&str, Value)>) -> Self::Object;
    fn filtered(&self, fixture: &Fixture, text: &str) -> Result<Vec<Self::Object>, TensorlabError>;
}

struct Models;

impl Objects for Models {
    type Object = Model;
    fn runtime() -> bool {
        false
    }
    fn make(&self, fixture: &Fixture, values: Vec<(&str, Value)>) -> Model {
        let count = fixture.storage.groups().count_models(None).expect("count");
        fixture.model(None, &format!("model{count}"), &values)
    }
    fn filtered(&self, fixture: &Fixture, text: &str) -> Result<Vec<Model>, TensorlabError> {
        let predicate = parse_expression(text).expect("filter parses");
        fixture.storage.models().list(None, None, Some(&predicate))
    }
}

struct Runs(Model);

impl Objects for Runs {
    type Object = Run;
    fn runtime() -> bool {
        true
    }
    fn make(&self, fixture: &Fixture, values: Vec<(&str, Value)>) -> Run {
        fixture.run(&self.0, &values)
    }
    fn filtered(&self, fixture: &Fixture, text: &str) -> Result<Vec<Run>, TensorlabError> {
        let predicate = parse_expression(text).expect("filter parses");
        fixture.storage.runs().list(&self.0, Some(&predicate))
    }
}

fn define<O: Objects>(fixture: &Fixture, name: &str, value_type: AttributeType, options: &str) {
    fixture.attr(None, Attribute::new(name, value_type, O::runtime()).with_options(options));
}

fn integer_equality<O: Objects>(fixture: &Fixture, objects: &O) {
    define::<O>(fixture, "a1", AttributeType::Integer, "");
    let o1 = objects.make(fixture, vec![("a1", Value::from(10))]);
    let o2 = objects.make(fixture, vec![("a1", Value::from(5))]);
    let o3 = objects.make(fixture, vec![("a1", Value::from(10))]);
    assert_eq!(objects.filtered(fixture, "a1==10").unwrap(), vec![o1, o3]);
    assert_eq!(objects.filtered(fixture, "a1==5").unwrap(), vec![o2]);
    assert!(objects.filtered(fixture, "a1==7").unwrap().is_empty());
}

fn float_comparison<O: Objects>(fixture: &Fixture, objects: &O) {
    define::<O>(fixture, "a1", AttributeType::Float, "");
    let o1 = objects.make(fixture, vec![("a1", Value::from(2.0))]);
    let o2 = objects.make(fixture, vec![("a1", Value::from(4.0))]);
    let o3 = objects.make(fixture, vec![("a1", Value::from(-5.0))]);
    assert_eq!(objects.filtered(fixture, "a1 < 3").unwrap(), vec![o1.clone(), o3]);
    assert_eq!(objects.filtered(fixture, "a1 > 2.0").unwrap(), vec![o2.clone()]);
    assert_eq!(objects.filtered(fixture, "a1 >= 2.0").unwrap(), vec![o1, o2]);
    assert!(objects.filtered(fixture, "a1 < -6").unwrap().is_empty());
}

fn enum_equality<O: Objects>(fixture: &Fixture, objects: &O) {
    define::<O>(fixture, "a1", AttributeType::Enum, "qwe;asd;zxc");
    let o1 = objects.make(fixture, vec![("a1", Value::from("qwe"))]);
    let o2 = objects.make(fixture, vec![("a1", Value::from("asd"))]);
    let o3 = objects.make(fixture, vec![("a1", Value::from("asd"))]);
    assert_eq!(objects.filtered(fixture, "a1==\"qwe\"").unwrap(), vec![o1]);
    assert_eq!(objects.filtered(fixture, "a1=='asd'").unwrap(), vec![o2, o3]);
    assert!(objects.filtered(fixture, "a1==\"zxc\"").unwrap().is_empty());
    assert!(matches!(objects.filtered(fixture, "a1==\"rty\""), Err(TensorlabError::IllegalArgument(_))));
}

fn string_equality<O: Objects>(fixture: &Fixture, objects: &O) {
    define::<O>(fixture, "a1", AttributeType::String, "");
    let o1 = objects.make(fixture, vec![("a1", Value::from("qwe"))]);
    let o2 = objects.make(fixture, vec![("a1", Value::from("asd"))]);
    let o3 = objects.make(fixture, vec![("a1", Value::from("asd"))]);
    assert_eq!(objects.filtered(fixture, "a1==\"qwe\"").unwrap(), vec![o1]);
    assert_eq!(objects.filtered(fixture, "a1==\"asd\"").unwrap(), vec![o2, o3]);
    assert!(objects.filtered(fixture, "a1==\"rty\"").unwrap().is_empty());
    assert!(matches!(objects.filtered(fixture, "a1 > 3"), Err(TensorlabError::IllegalArgument(_))));
    assert!(matches!(objects.filtered(fixture, "b == 3"), Err(TensorlabError::Lookup(_))));
}

fn complex_expression<O: Objects>(fixture: &Fixture, objects: &O) {
    define::<O>(fixture, "s1", AttributeType::String, "");
    define::<O>(fixture, "s2", AttributeType::String, "");
    define::<O>(fixture, "i", AttributeType::Integer, "");
    let mut made = Vec::new();
    for (s1, s2) in [("qwe", "asd"), ("qwe", "fgh"), ("rty", "asd"), ("rty", "fgh")] {
        for i in [2, 4, 6] {
            made.push(objects.make(
                fixture,
                vec![("s1", Value::from(s1)), ("s2", Value::from(s2)), ("i", Value::from(i))],
            ));
        }
    }
    let found = objects.filtered(fixture, "s1 == \"qwe\" and i > 5 or s2 == \"asd\" and i < 3").unwrap();
    // (qwe, asd, 2), (qwe, asd, 6), (qwe, fgh, 6), (rty, asd, 2)
    let expected: Vec<&O::Object> = [0, 2, 5, 6].iter().map(|i| &made[*i]).collect();
    assert_eq!(found.iter().collect::<Vec<_>>(), expected);
}

fn nulls_never_match<O: Objects>(fixture: &Fixture, objects: &O) {
    fixture.attr(None, Attribute::new("n", AttributeType::Integer, O::runtime()).nullable(true));
    let with_value = objects.make(fixture, vec![("n", Value::from(1))]);
    let without = objects.make(fixture, vec![]);
    assert_eq!(objects.filtered(fixture, "n == 1 or n != 1").unwrap(), vec![with_value]);
    assert_eq!(objects.filtered(fixture, "not n == 1").unwrap(), vec![without]);
}

macro_rules! filtering_tests {
    ($module:ident, $objects:expr) => {
        mod $module {
            use super::*;

            #[test]
            fn integer_equality() {
                let fixture = Fixture::new();
                super::integer_equality(&fixture, &$objects(&fixture));
            }

            #[test]
            fn float_comparison() {
                let fixture = Fixture::new();
                super::float_comparison(&fixture, &$objects(&fixture));
            }

            #[test]
            fn enum_equality() {
                let fixture = Fixture::new();
                super::enum_equality(&fixture, &$objects(&fixture));
            }

            #[test]
            fn string_equality() {
                let fixture = Fixture::new();
                super::string_equality(&fixture, &$objects(&fixture));
            }

            #[test]
            fn complex_expression() {
                let fixture = Fixture::new();
                super::complex_expression(&fixture, &$objects(&fixture));
            }

            #[test]
            fn nulls_never_match() {
                let fixture = Fixture::new();
                super::nulls_never_match(&fixture, &$objects(&fixture));
            }
        }
    };
}

filtering_tests!(models, |_: &Fixture| Models);
filtering_tests!(runs, |fixture: &Fixture| Runs(fixture.model(None, "mdl", &[])));

#[test]
fn filter_without_predicate_lists_everything() {
    let fixture = Fixture::new();
    let model = fixture.model(None, "m", &[]);
    fixture.run(&model, &[]);
    fixture.run(&model, &[]);
    assert_eq!(fixture.storage.models().list(None, None, None).unwrap(), vec![model.clone()]);
    assert_eq!(fixture.storage.runs().list(&model, None).unwrap().len(), 2);
}
