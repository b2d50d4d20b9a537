//! Response schema validation.
//!
//! # Data Flow
//! ```text
//! SchemaDefinition (config / register_schema)
//!     → rules.rs (compile to closed Rule set)
//!     → validator.rs (SchemaRegistry, single dispatcher)
//!     → Ok(()) | SchemaValidation { violations }
//! ```

pub mod rules;
pub mod validator;

pub use rules::{compile_definition, Rule, Schema, SchemaDefinition, ValueType};
pub use validator::{SchemaRegistry, Violation, ViolationKind};
