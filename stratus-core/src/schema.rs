//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type. Configuration is
//! validated against the schema once, then decoded into a typed struct so
//! handlers never work with raw attribute maps.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    List(Box<AttributeType>),
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Invalid configuration for {resource_type}: {}", join_errors(errors))]
    Invalid {
        resource_type: String,
        errors: Vec<TypeError>,
    },
}

fn join_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Output only; set by the remote side
    pub computed: bool,
    /// Changing this attribute requires replacing the resource
    pub force_new: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Provider-side property name (e.g., "VpcId" for AWS Cloud Control)
    pub provider_name: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            force_new: false,
            default: None,
            description: None,
            provider_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            let Some(schema) = self.attributes.get(name) else {
                // Unknown attributes are allowed (for flexibility)
                continue;
            };
            if schema.computed {
                errors.push(TypeError::ComputedAttribute { name: name.clone() });
            } else if let Err(e) = schema.attr_type.validate(value) {
                errors.push(TypeError::AttributeError {
                    name: name.clone(),
                    inner: Box::new(e),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            // HashMap iteration order is unstable; keep messages deterministic
            errors.sort_by_key(|e| e.to_string());
            Err(errors)
        }
    }

    /// Names of force-new attributes whose value differs between `from` and `to`
    pub fn force_new_changes(
        &self,
        from: &HashMap<String, Value>,
        to: &HashMap<String, Value>,
    ) -> Vec<String> {
        let mut changed: Vec<String> = self
            .attributes
            .values()
            .filter(|a| a.force_new && !a.computed)
            .filter(|a| from.get(&a.name) != to.get(&a.name))
            .map(|a| a.name.clone())
            .collect();
        changed.sort();
        changed
    }
}

/// Typed view over a validated attribute map
///
/// Falls back to the schema default when an attribute is absent.
pub struct AttributeReader<'a> {
    schema: &'a ResourceSchema,
    attributes: &'a HashMap<String, Value>,
}

impl<'a> AttributeReader<'a> {
    pub fn new(schema: &'a ResourceSchema, attributes: &'a HashMap<String, Value>) -> Self {
        Self { schema, attributes }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.attributes.get(name).or_else(|| {
            self.schema
                .attributes
                .get(name)
                .and_then(|a| a.default.as_ref())
        })
    }

    fn mismatch(name: &str, expected: &str, got: &Value) -> TypeError {
        TypeError::AttributeError {
            name: name.to_string(),
            inner: Box::new(TypeError::TypeMismatch {
                expected: expected.to_string(),
                got: got.type_name().to_string(),
            }),
        }
    }

    pub fn string(&self, name: &str) -> Result<String, TypeError> {
        self.optional_string(name)?
            .ok_or_else(|| TypeError::MissingRequired {
                name: name.to_string(),
            })
    }

    pub fn optional_string(&self, name: &str) -> Result<Option<String>, TypeError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(Self::mismatch(name, "String", other)),
        }
    }

    pub fn optional_int(&self, name: &str) -> Result<Option<i64>, TypeError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(Self::mismatch(name, "Int", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, TypeError> {
        self.optional_int(name)?
            .ok_or_else(|| TypeError::MissingRequired {
                name: name.to_string(),
            })
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, TypeError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(Self::mismatch(name, "Bool", other)),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, TypeError> {
        Ok(self.optional_bool(name)?.unwrap_or(default))
    }

    pub fn string_list(&self, name: &str) -> Result<Vec<String>, TypeError> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Self::mismatch(name, "List<String>", other)),
                })
                .collect(),
            Some(other) => Err(Self::mismatch(name, "List<String>", other)),
        }
    }

    /// String-valued map, e.g. tags
    pub fn string_map(&self, name: &str) -> Result<HashMap<String, String>, TypeError> {
        match self.get(name) {
            None => Ok(HashMap::new()),
            Some(Value::Map(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(Self::mismatch(name, "Map<String>", other)),
                })
                .collect(),
            Some(other) => Err(Self::mismatch(name, "Map<String>", other)),
        }
    }
}

/// Typed configuration decoded from a resource's attributes
pub trait FromAttributes: Sized {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError>;
}

/// Validate `attributes` against `schema`, then decode them into `T`
pub fn decode<T: FromAttributes>(
    schema: &ResourceSchema,
    attributes: &HashMap<String, Value>,
) -> Result<T, TypeError> {
    schema
        .validate(attributes)
        .map_err(|errors| TypeError::Invalid {
            resource_type: schema.resource_type.clone(),
            errors,
        })?;
    T::from_attributes(&AttributeReader::new(schema, attributes))
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n > 0 => Ok(()),
                Value::Int(_) => Err("Value must be positive".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => validate_cidr(s),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Map of string tags
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return Err(format!("Invalid CIDR format '{}': expected IP/prefix", cidr));
    };

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }
    if let Some(octet) = octets.iter().find(|o| o.parse::<u8>().is_err()) {
        return Err(format!(
            "Invalid octet '{}' in IP address: must be 0-255",
            octet
        ));
    }

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn subnet_schema() -> ResourceSchema {
        ResourceSchema::new("ec2_subnet")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("cidr_block", types::cidr()).required().force_new())
            .attribute(
                AttributeSchema::new("map_public_ip_on_launch", AttributeType::Bool)
                    .with_default(Value::Bool(false)),
            )
            .attribute(AttributeSchema::new("tags", types::tags()))
            .attribute(AttributeSchema::new("subnet_id", AttributeType::String).computed())
    }

    #[derive(Debug, PartialEq)]
    struct SubnetConfig {
        vpc_id: String,
        cidr_block: String,
        map_public_ip_on_launch: bool,
        tags: HashMap<String, String>,
    }

    impl FromAttributes for SubnetConfig {
        fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
            Ok(Self {
                vpc_id: reader.string("vpc_id")?,
                cidr_block: reader.string("cidr_block")?,
                map_public_ip_on_launch: reader.bool_or("map_public_ip_on_launch", false)?,
                tags: reader.string_map("tags")?,
            })
        }
    }

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&Value::String("hello".to_string())).is_ok());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::Enum(vec!["default".to_string(), "dedicated".to_string()]);
        assert!(t.validate(&Value::from("dedicated")).is_ok());
        assert!(t.validate(&Value::from("host")).is_err());
    }

    #[test]
    fn validate_positive_int() {
        let t = types::positive_int();
        assert!(t.validate(&Value::Int(1)).is_ok());
        assert!(t.validate(&Value::Int(0)).is_err());
        assert!(t.validate(&Value::Int(-1)).is_err());
        assert!(t.validate(&Value::from("1")).is_err());
    }

    #[test]
    fn validate_cidr_type() {
        let t = types::cidr();
        for ok in ["10.0.0.0/16", "192.168.1.0/24", "0.0.0.0/0", "255.255.255.255/32"] {
            assert!(t.validate(&Value::from(ok)).is_ok(), "{ok}");
        }
        for bad in ["10.0.0.0", "10.0.0.0/33", "10.0.0.256/16", "10.0.0/16", "invalid"] {
            assert!(t.validate(&Value::from(bad)).is_err(), "{bad}");
        }
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn missing_required_and_computed_attributes_are_rejected() {
        let schema = subnet_schema();
        let errors = schema
            .validate(&attrs(&[("subnet_id", Value::from("subnet-1"))]))
            .unwrap_err();
        assert!(errors.contains(&TypeError::MissingRequired {
            name: "vpc_id".to_string()
        }));
        assert!(errors.contains(&TypeError::ComputedAttribute {
            name: "subnet_id".to_string()
        }));
    }

    #[test]
    fn decode_produces_typed_config_with_defaults() {
        let mut tags = HashMap::new();
        tags.insert("Name".to_string(), Value::from("public-a"));
        let config: SubnetConfig = decode(
            &subnet_schema(),
            &attrs(&[
                ("vpc_id", Value::from("vpc-1")),
                ("cidr_block", Value::from("10.0.1.0/24")),
                ("tags", Value::Map(tags)),
            ]),
        )
        .unwrap();

        assert_eq!(config.vpc_id, "vpc-1");
        assert_eq!(config.cidr_block, "10.0.1.0/24");
        assert!(!config.map_public_ip_on_launch);
        assert_eq!(config.tags["Name"], "public-a");
    }

    #[test]
    fn decode_reports_invalid_attributes() {
        let err = decode::<SubnetConfig>(
            &subnet_schema(),
            &attrs(&[
                ("vpc_id", Value::from("vpc-1")),
                ("cidr_block", Value::from("10.0.1.0")),
            ]),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid configuration for ec2_subnet"));
        assert!(message.contains("cidr_block"));
    }

    #[test]
    fn reader_reports_type_mismatch() {
        let schema = subnet_schema();
        let values = attrs(&[("vpc_id", Value::Int(3))]);
        let reader = AttributeReader::new(&schema, &values);
        assert!(matches!(
            reader.string("vpc_id"),
            Err(TypeError::AttributeError { .. })
        ));
        assert!(matches!(
            reader.string("cidr_block"),
            Err(TypeError::MissingRequired { .. })
        ));
    }

    #[test]
    fn force_new_changes_are_detected() {
        let schema = subnet_schema();
        let from = attrs(&[
            ("vpc_id", Value::from("vpc-1")),
            ("cidr_block", Value::from("10.0.1.0/24")),
        ]);
        let mut to = from.clone();
        to.insert("map_public_ip_on_launch".to_string(), Value::Bool(true));
        assert!(schema.force_new_changes(&from, &to).is_empty());

        to.insert("cidr_block".to_string(), Value::from("10.0.2.0/24"));
        assert_eq!(schema.force_new_changes(&from, &to), vec!["cidr_block"]);
    }
}
