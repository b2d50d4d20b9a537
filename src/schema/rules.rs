//! Schema definitions and their compiled rule form.
//!
//! A [`SchemaDefinition`] is the serde-facing shape (config files, JSON). It
//! is compiled once into a flat list of [`Rule`]s; the validator only ever
//! dispatches over that closed set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// JSON value types a rule can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Object,
    String,
    Number,
    Boolean,
    Array,
}

impl ValueType {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ValueType::Object => value.is_object(),
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Object => "object",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
        };
        f.write_str(s)
    }
}

/// Declarative schema, as written in config or registered at runtime.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaDefinition {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueType>,

    /// Inclusive lower bound for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound for numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Regular expression strings must match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Fields that must be present on an object.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Per-field rules for an object.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, SchemaDefinition>,

    /// Name of a registered schema the value must also satisfy.
    #[serde(rename = "schema", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl SchemaDefinition {
    pub fn of_type(kind: ValueType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, name: impl Into<String>, definition: SchemaDefinition) -> Self {
        self.properties.insert(name.into(), definition);
        self
    }

    pub fn reference(mut self, schema: impl Into<String>) -> Self {
        self.reference = Some(schema.into());
        self
    }
}

/// One compiled validation rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Type(ValueType),
    Minimum(f64),
    Maximum(f64),
    Pattern(Regex),
    Required(Vec<String>),
    /// Rules applied to one field of an object, when present.
    Property { name: String, rules: Vec<Rule> },
    /// Delegate to another registered schema.
    Reference(String),
}

/// A compiled, immutable schema.
#[derive(Debug, Clone)]
pub struct Schema {
    rules: Vec<Rule>,
}

impl Schema {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Compile a definition, rejecting bad patterns, inverted bounds and
/// nested property blocks (nested objects go through a named reference).
pub fn compile_definition(definition: &SchemaDefinition) -> Result<Schema, String> {
    let mut rules = compile_value_rules(definition, "$")?;

    if !definition.required.is_empty() {
        rules.push(Rule::Required(definition.required.clone()));
    }

    for (name, property) in &definition.properties {
        if !property.properties.is_empty() || !property.required.is_empty() {
            return Err(format!(
                "property '{}' declares nested fields; reference a named schema instead",
                name
            ));
        }
        rules.push(Rule::Property {
            name: name.clone(),
            rules: compile_value_rules(property, name)?,
        });
    }

    Ok(Schema { rules })
}

fn compile_value_rules(definition: &SchemaDefinition, field: &str) -> Result<Vec<Rule>, String> {
    let mut rules = Vec::new();

    if let Some(kind) = definition.kind {
        rules.push(Rule::Type(kind));
    }

    if let (Some(min), Some(max)) = (definition.minimum, definition.maximum) {
        if min > max {
            return Err(format!("{}: minimum {} exceeds maximum {}", field, min, max));
        }
    }
    if let Some(min) = definition.minimum {
        rules.push(Rule::Minimum(min));
    }
    if let Some(max) = definition.maximum {
        rules.push(Rule::Maximum(max));
    }

    if let Some(pattern) = &definition.pattern {
        let regex = Regex::new(pattern)
            .map_err(|e| format!("{}: invalid pattern '{}': {}", field, pattern, e))?;
        rules.push(Rule::Pattern(regex));
    }

    if let Some(reference) = &definition.reference {
        rules.push(Rule::Reference(reference.clone()));
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_orders_rules() {
        let def = SchemaDefinition::of_type(ValueType::Object)
            .required(["a"])
            .property("a", SchemaDefinition::of_type(ValueType::Number).minimum(1.0));
        let schema = compile_definition(&def).unwrap();

        assert!(matches!(schema.rules()[0], Rule::Type(ValueType::Object)));
        assert!(matches!(schema.rules()[1], Rule::Required(_)));
        match &schema.rules()[2] {
            Rule::Property { name, rules } => {
                assert_eq!(name, "a");
                assert_eq!(rules.len(), 2);
            }
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn test_compile_rejects_inverted_bounds() {
        let def = SchemaDefinition::of_type(ValueType::Number).minimum(10.0).maximum(1.0);
        assert!(compile_definition(&def).unwrap_err().contains("exceeds maximum"));
    }

    #[test]
    fn test_compile_rejects_nested_properties() {
        let inner = SchemaDefinition::of_type(ValueType::Object)
            .property("x", SchemaDefinition::of_type(ValueType::Number));
        let def = SchemaDefinition::of_type(ValueType::Object).property("pos", inner);
        assert!(compile_definition(&def).unwrap_err().contains("named schema"));
    }

    #[test]
    fn test_definition_from_json() {
        let def: SchemaDefinition = serde_json::from_str(
            r#"{"type":"object","required":["id"],"properties":{"id":{"type":"string","pattern":"^[a-z]+$"}}}"#,
        )
        .unwrap();
        assert_eq!(def.kind, Some(ValueType::Object));
        assert_eq!(def.properties["id"].pattern.as_deref(), Some("^[a-z]+$"));
    }
}
