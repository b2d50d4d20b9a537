//! Schema registry and validation dispatcher.
//!
//! Registration is append/overwrite by name; nothing is removed implicitly.
//! Validation collects every violation instead of stopping at the first.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{ClientError, ClientResult};
use crate::schema::rules::{compile_definition, Rule, Schema, SchemaDefinition};

/// Maximum chain of schema references followed for one value.
const MAX_REFERENCE_DEPTH: usize = 16;

/// Which rule a violation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Type,
    Minimum,
    Maximum,
    Pattern,
    Required,
    Reference,
}

/// One failed rule, located by a dotted field path (`$` is the root).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Named schemas, shared across calls.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register `definition` under `name`, replacing any
    /// previous schema with that name.
    pub fn register(&self, name: impl Into<String>, definition: &SchemaDefinition) -> ClientResult<()> {
        let name = name.into();
        let schema = compile_definition(definition)
            .map_err(|e| ClientError::Config(format!("schema '{}': {}", name, e)))?;
        if self.schemas.insert(name.clone(), Arc::new(schema)).is_some() {
            tracing::debug!(schema = %name, "Replaced registered schema");
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Every violation of schema `name` in `payload`.
    pub fn violations(&self, payload: &Value, name: &str) -> ClientResult<Vec<Violation>> {
        let schema = self.lookup(name)?;
        let mut out = Vec::new();
        self.check_all(schema.rules(), payload, "$", 0, &mut out);
        Ok(out)
    }

    /// Validate `payload`, failing with every violation at once.
    pub fn validate(&self, payload: &Value, name: &str) -> ClientResult<()> {
        let violations = self.violations(payload, name)?;
        if violations.is_empty() {
            Ok(())
        } else {
            tracing::debug!(schema = %name, count = violations.len(), "Schema validation failed");
            Err(ClientError::SchemaValidation {
                schema: name.to_string(),
                violations,
            })
        }
    }

    fn lookup(&self, name: &str) -> ClientResult<Arc<Schema>> {
        self.schemas
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| ClientError::UnknownSchema(name.to_string()))
    }

    fn check_all(&self, rules: &[Rule], value: &Value, path: &str, depth: usize, out: &mut Vec<Violation>) {
        // A value of the wrong type makes the remaining rules meaningless.
        for rule in rules {
            if let Rule::Type(kind) = rule {
                if !kind.matches(value) {
                    out.push(Violation {
                        field: path.to_string(),
                        kind: ViolationKind::Type,
                        message: format!("expected {}, found {}", kind, json_type_name(value)),
                    });
                    return;
                }
            }
        }
        for rule in rules {
            self.check(rule, value, path, depth, out);
        }
    }

    fn check(&self, rule: &Rule, value: &Value, path: &str, depth: usize, out: &mut Vec<Violation>) {
        match rule {
            Rule::Type(_) => {}
            Rule::Minimum(min) => {
                if let Some(n) = value.as_f64() {
                    if n < *min {
                        out.push(violation(path, ViolationKind::Minimum, format!("{} is below minimum {}", n, min)));
                    }
                }
            }
            Rule::Maximum(max) => {
                if let Some(n) = value.as_f64() {
                    if n > *max {
                        out.push(violation(path, ViolationKind::Maximum, format!("{} exceeds maximum {}", n, max)));
                    }
                }
            }
            Rule::Pattern(regex) => {
                if let Some(s) = value.as_str() {
                    if !regex.is_match(s) {
                        out.push(violation(
                            path,
                            ViolationKind::Pattern,
                            format!("'{}' does not match pattern {}", s, regex.as_str()),
                        ));
                    }
                }
            }
            Rule::Required(fields) => {
                if let Some(object) = value.as_object() {
                    for field in fields {
                        if !object.contains_key(field) {
                            out.push(violation(
                                &join_path(path, field),
                                ViolationKind::Required,
                                "required field is missing".to_string(),
                            ));
                        }
                    }
                }
            }
            Rule::Property { name, rules } => {
                if let Some(field_value) = value.as_object().and_then(|o| o.get(name)) {
                    self.check_all(rules, field_value, &join_path(path, name), depth, out);
                }
            }
            Rule::Reference(schema_name) => {
                if depth >= MAX_REFERENCE_DEPTH {
                    out.push(violation(
                        path,
                        ViolationKind::Reference,
                        format!("schema reference depth exceeded at '{}'", schema_name),
                    ));
                    return;
                }
                match self.lookup(schema_name) {
                    Ok(schema) => self.check_all(schema.rules(), value, path, depth + 1, out),
                    Err(_) => out.push(violation(
                        path,
                        ViolationKind::Reference,
                        format!("referenced schema '{}' is not registered", schema_name),
                    )),
                }
            }
        }
    }
}

fn violation(path: &str, kind: ViolationKind, message: String) -> Violation {
    Violation {
        field: path.to_string(),
        kind,
        message,
    }
}

fn join_path(parent: &str, field: &str) -> String {
    if parent == "$" {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::rules::ValueType;
    use serde_json::json;

    fn player_stats() -> SchemaDefinition {
        SchemaDefinition::of_type(ValueType::Object)
            .required(["health", "level", "class"])
            .property(
                "health",
                SchemaDefinition::of_type(ValueType::Number).minimum(0.0).maximum(100.0),
            )
            .property("level", SchemaDefinition::of_type(ValueType::Number).minimum(1.0))
            .property(
                "class",
                SchemaDefinition::of_type(ValueType::String).pattern("^(archer|rogue|gladiator|mage)$"),
            )
    }

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry.register("PlayerStats", &player_stats()).unwrap();
        registry
    }

    #[test]
    fn test_player_stats_single_violation() {
        let registry = registry();
        let violations = registry
            .violations(&json!({"health": 150, "level": 3, "class": "archer"}), "PlayerStats")
            .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "health");
        assert_eq!(violations[0].kind, ViolationKind::Maximum);
    }

    #[test]
    fn test_reports_every_violation() {
        let registry = registry();
        let err = registry
            .validate(&json!({"health": -5, "class": "archer"}), "PlayerStats")
            .unwrap_err();

        match err {
            ClientError::SchemaValidation { schema, violations } => {
                assert_eq!(schema, "PlayerStats");
                let kinds: Vec<_> = violations.iter().map(|v| (v.field.as_str(), v.kind)).collect();
                assert!(kinds.contains(&("level", ViolationKind::Required)));
                assert!(kinds.contains(&("health", ViolationKind::Minimum)));
                assert_eq!(violations.len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pattern_and_type_violations() {
        let registry = registry();
        let violations = registry
            .violations(&json!({"health": "full", "level": 2, "class": "wizard"}), "PlayerStats")
            .unwrap();
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::Pattern, ViolationKind::Type]);
    }

    #[test]
    fn test_root_type_mismatch_short_circuits() {
        let registry = registry();
        let violations = registry.violations(&json!([1, 2, 3]), "PlayerStats").unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "$");
        assert_eq!(violations[0].message, "expected object, found array");
    }

    #[test]
    fn test_valid_payload() {
        let registry = registry();
        assert!(registry
            .validate(&json!({"health": 100, "level": 1, "class": "mage", "extra": true}), "PlayerStats")
            .is_ok());
    }

    #[test]
    fn test_unknown_schema() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.validate(&json!({}), "Missing"),
            Err(ClientError::UnknownSchema(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_nested_reference() {
        let registry = registry();
        let character = SchemaDefinition::of_type(ValueType::Object)
            .required(["name", "stats"])
            .property("name", SchemaDefinition::of_type(ValueType::String))
            .property("stats", SchemaDefinition::default().reference("PlayerStats"));
        registry.register("Character", &character).unwrap();

        let violations = registry
            .violations(&json!({"name": "Ash", "stats": {"health": 10, "level": 0, "class": "rogue"}}), "Character")
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "stats.level");
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let registry = SchemaRegistry::new();
        registry
            .register("Loop", &SchemaDefinition::default().reference("Loop"))
            .unwrap();
        let violations = registry.violations(&json!({}), "Loop").unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Reference);
    }

    #[test]
    fn test_register_overwrites() {
        let registry = registry();
        registry
            .register("PlayerStats", &SchemaDefinition::of_type(ValueType::Array))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.validate(&json!([]), "PlayerStats").is_ok());
    }
}
