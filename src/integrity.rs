//! Rules that keep attribute definitions and stored values consistent.
//!
//! Every check here runs on a [`Persistor`] borrowed from the same transaction
//! that performs the write it guards, so a failed check leaves nothing behind.
//!
//! The scope of an attribute defined on group `G` is `G` and every group
//! below it, except for subtrees rooted at a group that defines an attribute
//! of the same name (an override). Models of the scope groups are in scope of
//! model attributes, their runs in scope of runtime attributes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::datatype::{AttributeTarget, AttributeType};
use crate::entity::{Attribute, AttributeFields, AttributeInput, AttributeValues};
use crate::error::{Result, TensorlabError};
use crate::persist::Persistor;
use crate::predicate::Expression;

/// Attribute definitions visible from a group, by name.
pub type EffectiveAttributes = BTreeMap<String, Attribute>;

/// Validated values of a model or run about to be written.
#[derive(Debug, Clone, Default)]
pub struct EncodedValues {
    /// `(attribute id, encoded value)` for every supplied value.
    pub rows: Vec<(i64, String)>,
    /// Every attribute in effect with its supplied value, default or null.
    pub resolved: AttributeValues,
}

// ------------- Resolution -------------
/// The group followed by its ancestors up to and including the root.
pub fn ancestry(persistor: &Persistor<'_>, group_id: i64) -> Result<Vec<i64>> {
    let mut chain = vec![group_id];
    let mut current = group_id;
    loop {
        let parent = persistor.group(current)?.saved_key()?.owner_id;
        if parent == current {
            return Ok(chain);
        }
        if chain.contains(&parent) {
            return Err(TensorlabError::internal(format!("group {} is its own ancestor", parent)));
        }
        chain.push(parent);
        current = parent;
    }
}

/// Walks from `group_id` to the root; the first definition of a name wins.
pub fn resolve_effective(persistor: &Persistor<'_>, group_id: i64) -> Result<EffectiveAttributes> {
    let mut effective = EffectiveAttributes::new();
    for id in ancestry(persistor, group_id)? {
        for attribute in persistor.attributes_of_group(id)? {
            effective.entry(attribute.name.clone()).or_insert(attribute);
        }
    }
    Ok(effective)
}

pub fn for_target(effective: &EffectiveAttributes, target: AttributeTarget) -> EffectiveAttributes {
    effective
        .iter()
        .filter(|(_, attribute)| attribute.target() == target)
        .map(|(name, attribute)| (name.clone(), attribute.clone()))
        .collect()
}

/// The definition of `name` closest above `group_id`, skipping the group itself.
fn nearest_ancestor_definition(persistor: &Persistor<'_>, group_id: i64, name: &str) -> Result<Option<Attribute>> {
    for id in ancestry(persistor, group_id)?.into_iter().skip(1) {
        if let Some(attribute) = persistor.attribute_by_name(id, name)? {
            return Ok(Some(attribute));
        }
    }
    Ok(None)
}

// ------------- Values -------------
/// Checks supplied values against the definitions in effect for `target` and
/// encodes them. Unknown names, values of the other target and missing
/// required values are rejected.
pub fn validate_and_encode(
    effective: &EffectiveAttributes,
    target: AttributeTarget,
    supplied: &AttributeInput,
) -> Result<EncodedValues> {
    let rows = encode_supplied(effective, target, supplied)?;
    let mut encoded = EncodedValues::default();
    let mut missing = Vec::new();
    for attribute in effective.values().filter(|a| a.target() == target) {
        let id = attribute.saved_key()?.id;
        match rows.iter().find(|(attr_id, _)| *attr_id == id) {
            Some((_, value)) => {
                let typed = attribute.value_type.decode(value, &attribute.options)?;
                encoded.resolved.insert(attribute.name.clone(), Some(typed));
            }
            None if attribute.required() => missing.push(attribute.name.as_str()),
            None => {
                encoded.resolved.insert(attribute.name.clone(), attribute.default.clone());
            }
        }
    }
    if !missing.is_empty() {
        return Err(TensorlabError::illegal_argument(format!(
            "Missing values for required attributes: {}",
            missing.join(", ")
        )));
    }
    encoded.rows = rows;
    Ok(encoded)
}

/// Encodes only the supplied values, without asking for the missing ones.
pub fn encode_supplied(
    effective: &EffectiveAttributes,
    target: AttributeTarget,
    supplied: &AttributeInput,
) -> Result<Vec<(i64, String)>> {
    let mut rows = Vec::with_capacity(supplied.len());
    for (name, value) in supplied {
        let attribute = match effective.get(name) {
            Some(attribute) if attribute.target() == target => attribute,
            Some(attribute) => {
                return Err(TensorlabError::illegal_argument(format!(
                    "Attribute '{}' is given per {}, not per {}",
                    name,
                    attribute.target().noun(),
                    target.noun()
                )));
            }
            None => {
                return Err(TensorlabError::illegal_argument(format!(
                    "Attribute '{}' is not defined for this {}",
                    name,
                    target.noun()
                )));
            }
        };
        let encoded = attribute
            .value_type
            .encode(value, &attribute.options)
            .map_err(|e| TensorlabError::illegal_argument(format!("Invalid value for '{}': {}", name, e)))?;
        rows.push((attribute.saved_key()?.id, encoded));
    }
    Ok(rows)
}

/// One entry per definition: the stored value, else the default, else null.
pub fn values_with_defaults<'a>(
    definitions: impl IntoIterator<Item = &'a Attribute>,
    stored: &HashMap<i64, String>,
) -> Result<AttributeValues> {
    let mut values = AttributeValues::new();
    for attribute in definitions {
        let value = match stored.get(&attribute.saved_key()?.id) {
            Some(encoded) => Some(attribute.value_type.decode(encoded, &attribute.options).map_err(|e| {
                TensorlabError::internal(format!("stored value of '{}' is malformed: {}", attribute.name, e))
            })?),
            None => attribute.default.clone(),
        };
        values.insert(attribute.name.clone(), value);
    }
    Ok(values)
}

// ------------- Definitions -------------
/// An override may not be nullable when the definition it shadows is not.
pub fn check_override(ancestor: Option<&Attribute>, nullable: bool) -> Result<()> {
    match ancestor {
        Some(ancestor) if nullable && !ancestor.nullable => Err(TensorlabError::illegal_argument(format!(
            "Cannot override non-nullable attribute '{}' as nullable",
            ancestor.name
        ))),
        _ => Ok(()),
    }
}

pub fn check_attribute_name(name: &str) -> Result<()> {
    match Expression::parse_identifier(name) {
        Some((_, rest)) if rest.is_empty() => Ok(()),
        _ => Err(TensorlabError::illegal_argument(format!(
            "Attribute name '{}' must start with a letter, contain only letters and digits and not be and/or/not",
            name
        ))),
    }
}

fn check_options(attribute: &Attribute) -> Result<()> {
    if attribute.value_type.validate_options(&attribute.options) {
        Ok(())
    } else {
        Err(TensorlabError::illegal_argument(format!(
            "Options '{}' are not valid for a {} attribute",
            attribute.options, attribute.value_type
        )))
    }
}

fn encode_default(attribute: &Attribute) -> Result<Option<String>> {
    attribute
        .default
        .as_ref()
        .map(|default| {
            attribute.value_type.encode(default, &attribute.options).map_err(|e| {
                TensorlabError::illegal_argument(format!("Invalid default for '{}': {}", attribute.name, e))
            })
        })
        .transpose()
}

struct Scope {
    groups: Vec<i64>,
    overrides: Vec<Attribute>,
}

fn scope(persistor: &Persistor<'_>, group_id: i64, name: &str) -> Result<Scope> {
    let mut scope = Scope { groups: vec![group_id], overrides: Vec::new() };
    let mut next = 0;
    while next < scope.groups.len() {
        for child in persistor.child_group_ids(scope.groups[next])? {
            match persistor.attribute_by_name(child, name)? {
                Some(attribute) => scope.overrides.push(attribute),
                None => scope.groups.push(child),
            }
        }
        next += 1;
    }
    Ok(scope)
}

fn scope_targets(persistor: &Persistor<'_>, groups: &[i64], target: AttributeTarget) -> Result<Vec<String>> {
    let mut uids = Vec::new();
    for group_id in groups {
        match target {
            AttributeTarget::Model => uids.extend(persistor.model_uids(*group_id)?),
            AttributeTarget::Run => uids.extend(persistor.run_uids_in_group(*group_id)?),
        }
    }
    Ok(uids)
}

fn check_overrides_not_nullable(scope: &Scope, attribute: &Attribute) -> Result<()> {
    match scope.overrides.iter().find(|o| o.nullable) {
        Some(_) => Err(TensorlabError::illegal_argument(format!(
            "Attribute '{}' cannot be non-nullable while a subgroup overrides it as nullable",
            attribute.name
        ))),
        None => Ok(()),
    }
}

/// Checks a new definition of `attribute` on `group_id`. Returns the
/// encoded default to store.
pub fn check_definition(persistor: &Persistor<'_>, group_id: i64, attribute: &Attribute) -> Result<Option<String>> {
    check_attribute_name(&attribute.name)?;
    check_options(attribute)?;
    let default = encode_default(attribute)?;
    if attribute.nullable {
        check_override(nearest_ancestor_definition(persistor, group_id, &attribute.name)?.as_ref(), true)?;
    }
    let scope = scope(persistor, group_id, &attribute.name)?;
    if !attribute.nullable {
        check_overrides_not_nullable(&scope, attribute)?;
    }
    if attribute.required() {
        let existing = scope_targets(persistor, &scope.groups, attribute.target())?.len();
        if existing > 0 {
            return Err(TensorlabError::invalid_state(format!(
                "Cannot define required attribute '{}' since {} {}s already exist without a value for it",
                attribute.name,
                existing,
                attribute.target().noun()
            )));
        }
    }
    Ok(default)
}

/// Checks the changes made to a saved attribute. Returns the encoded
/// default to store.
pub fn check_update(persistor: &Persistor<'_>, attribute: &Attribute) -> Result<Option<String>> {
    let key = attribute.saved_key()?;
    let stored: &AttributeFields = &key.stored;
    let dirty = attribute.get_dirty();

    let immutable: Vec<&str> = ["name", "type", "runtime"].into_iter().filter(|f| dirty.contains(f)).collect();
    if !immutable.is_empty() {
        return Err(TensorlabError::illegal_argument(format!(
            "Cannot change {} of attribute '{}'",
            immutable.join(", "),
            stored.name
        )));
    }

    if dirty.contains("options") {
        check_options(attribute)?;
        let values = persistor.values_of_attribute(key.id)?;
        if attribute.value_type == AttributeType::Enum {
            let kept: HashSet<&str> = AttributeType::choices(&attribute.options).into_iter().collect();
            let dropped: BTreeSet<&str> =
                values.iter().map(|(_, value)| value.as_str()).filter(|value| !kept.contains(value)).collect();
            if !dropped.is_empty() {
                return Err(TensorlabError::illegal_argument(format!(
                    "Cannot remove choices {} of '{}' since stored values use them",
                    dropped.into_iter().collect::<Vec<_>>().join(", "),
                    stored.name
                )));
            }
        } else {
            for (_, value) in &values {
                attribute
                    .value_type
                    .decode(value, &stored.options)
                    .and_then(|typed| attribute.value_type.encode(&typed, &attribute.options))
                    .map_err(|e| {
                        TensorlabError::illegal_argument(format!(
                            "Stored value '{}' of '{}' does not satisfy options '{}': {}",
                            value, stored.name, attribute.options, e
                        ))
                    })?;
            }
        }
    }

    let default = encode_default(attribute)?;
    let scope = scope(persistor, key.owner_id, &stored.name)?;
    if dirty.contains("nullable") {
        if attribute.nullable {
            check_override(nearest_ancestor_definition(persistor, key.owner_id, &stored.name)?.as_ref(), true)?;
        } else {
            check_overrides_not_nullable(&scope, attribute)?;
        }
    }

    if attribute.required() && !stored.required() {
        let with_value: HashSet<String> =
            persistor.values_of_attribute(key.id)?.into_iter().map(|(uid, _)| uid).collect();
        let missing = scope_targets(persistor, &scope.groups, attribute.target())?
            .into_iter()
            .filter(|uid| !with_value.contains(uid))
            .count();
        if missing > 0 {
            return Err(TensorlabError::invalid_state(format!(
                "Cannot make attribute '{}' required since {} {}s have no value for it",
                stored.name,
                missing,
                attribute.target().noun()
            )));
        }
    }
    Ok(default)
}

/// `(entities with a stored value, entities in scope)`.
pub fn usage_stats(persistor: &Persistor<'_>, attribute: &Attribute) -> Result<(usize, usize)> {
    let key = attribute.saved_key()?;
    let scope = scope(persistor, key.owner_id, &key.stored.name)?;
    let targets = scope_targets(persistor, &scope.groups, AttributeTarget::from_runtime(key.stored.runtime))?;
    let with_value: HashSet<String> = persistor.values_of_attribute(key.id)?.into_iter().map(|(uid, _)| uid).collect();
    let n_with_value = targets.iter().filter(|uid| with_value.contains(*uid)).count();
    Ok((n_with_value, targets.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Value;
    use crate::entity::Key;

    fn saved(mut attribute: Attribute, id: i64) -> Attribute {
        let fields = attribute.fields();
        attribute.set_key(Key::new(id, None, 1, fields));
        attribute
    }

    fn effective() -> EffectiveAttributes {
        [
            saved(Attribute::new("depth", AttributeType::Integer, false).with_options("positive"), 1),
            saved(Attribute::new("note", AttributeType::String, false).nullable(true), 2),
            saved(Attribute::new("lr", AttributeType::Float, false).with_default(0.1), 3),
            saved(Attribute::new("seed", AttributeType::Integer, true), 4),
        ]
        .into_iter()
        .map(|a| (a.name.clone(), a))
        .collect()
    }

    #[test]
    fn supplied_values_are_encoded_and_defaults_filled() {
        let supplied = AttributeInput::from([("depth".to_string(), Value::from("12"))]);
        let encoded = validate_and_encode(&effective(), AttributeTarget::Model, &supplied).unwrap();
        assert_eq!(encoded.rows, vec![(1, "12".to_string())]);
        assert_eq!(encoded.resolved.len(), 3, "run attributes are not part of a model");
        assert_eq!(encoded.resolved["depth"], Some(Value::Integer(12)));
        assert_eq!(encoded.resolved["note"], None);
        assert_eq!(encoded.resolved["lr"], Some(Value::Float(0.1)));
    }

    #[test]
    fn missing_unknown_and_misplaced_values_are_rejected() {
        let defs = effective();
        let err = validate_and_encode(&defs, AttributeTarget::Model, &AttributeInput::new()).unwrap_err();
        assert!(err.to_string().contains("depth"), "unexpected message {err}");

        let unknown = AttributeInput::from([("depth".to_string(), Value::from(1)), ("x".to_string(), Value::from(1))]);
        assert!(matches!(
            validate_and_encode(&defs, AttributeTarget::Model, &unknown),
            Err(TensorlabError::IllegalArgument(_))
        ));

        let runtime = AttributeInput::from([("depth".to_string(), Value::from(1)), ("seed".to_string(), Value::from(1))]);
        assert!(matches!(
            validate_and_encode(&defs, AttributeTarget::Model, &runtime),
            Err(TensorlabError::IllegalArgument(_))
        ));

        let negative = AttributeInput::from([("depth".to_string(), Value::from(-1))]);
        assert!(validate_and_encode(&defs, AttributeTarget::Model, &negative).is_err());
    }

    #[test]
    fn every_definition_gets_an_entry() {
        let defs = effective();
        let stored = HashMap::from([(1, "7".to_string()), (3, "0.5".to_string())]);
        let values = values_with_defaults(for_target(&defs, AttributeTarget::Model).values(), &stored).unwrap();
        assert_eq!(
            values,
            AttributeValues::from([
                ("depth".to_string(), Some(Value::Integer(7))),
                ("lr".to_string(), Some(Value::Float(0.5))),
                ("note".to_string(), None),
            ])
        );
    }

    #[test]
    fn nullable_override_of_non_nullable() {
        let strict = Attribute::new("a", AttributeType::Integer, false);
        let loose = strict.clone().nullable(true);
        assert!(check_override(Some(&strict), true).is_err());
        assert!(check_override(Some(&strict), false).is_ok());
        assert!(check_override(Some(&loose), true).is_ok());
        assert!(check_override(None, true).is_ok());
    }

    #[test]
    fn attribute_names_follow_the_filter_grammar() {
        assert!(check_attribute_name("lr2").is_ok());
        for bad in ["", "2lr", "learning_rate", "and", "a b"] {
            assert!(check_attribute_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
