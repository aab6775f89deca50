//! Structural validation of tool arguments.
//!
//! A [`Shape`] is compiled from the subset of JSON Schema that tool servers
//! publish in practice: `type` (single or list), `properties`, `required`,
//! `enum` and `items`. Unknown keywords are ignored and extra properties are
//! allowed.

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl Kind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "object" => Kind::Object,
            "array" => Kind::Array,
            "string" => Kind::String,
            "number" => Kind::Number,
            "integer" => Kind::Integer,
            "boolean" => Kind::Boolean,
            "null" => Kind::Null,
            _ => return None,
        })
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
            Kind::String => value.is_string(),
            Kind::Number => value.is_number(),
            Kind::Integer => value.is_i64() || value.is_u64(),
            Kind::Boolean => value.is_boolean(),
            Kind::Null => value.is_null(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Integer => "integer",
            Kind::Boolean => "boolean",
            Kind::Null => "null",
        }
    }
}

/// Compiled structural expectations for a JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    /// Accepted kinds; empty means any
    kinds: Vec<Kind>,
    enum_values: Option<Vec<Value>>,
    required: Vec<String>,
    properties: BTreeMap<String, Shape>,
    items: Option<Box<Shape>>,
}

impl Shape {
    /// Shape that accepts any value.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn compile(schema: &Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return Self::any();
        };

        let kinds = match obj.get("type") {
            Some(Value::String(s)) => Kind::parse(s).into_iter().collect(),
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| v.as_str().and_then(Kind::parse))
                .collect(),
            _ => Vec::new(),
        };

        let required = obj
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let properties = obj
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| {
                p.iter()
                    .map(|(name, sub)| (name.clone(), Shape::compile(sub)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kinds,
            enum_values: obj.get("enum").and_then(|e| e.as_array()).cloned(),
            required,
            properties,
            items: obj.get("items").map(|i| Box::new(Shape::compile(i))),
        }
    }

    /// Check `value`, collecting every violation with its path.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        self.check("$", value, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check(&self, path: &str, value: &Value, errors: &mut Vec<String>) {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k.matches(value)) {
            let expected: Vec<&str> = self.kinds.iter().map(Kind::name).collect();
            errors.push(format!("{}: expected {}", path, expected.join(" or ")));
            return;
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                errors.push(format!("{}: value {} is not one of the allowed values", path, value));
            }
        }

        if let Value::Object(map) = value {
            for name in &self.required {
                if !map.contains_key(name) {
                    errors.push(format!("{}: missing required property '{}'", path, name));
                }
            }
            for (name, shape) in &self.properties {
                if let Some(child) = map.get(name) {
                    shape.check(&format!("{}.{}", path, name), child, errors);
                }
            }
        }

        if let (Value::Array(list), Some(items)) = (value, &self.items) {
            for (i, item) in list.iter().enumerate() {
                items.check(&format!("{}[{}]", path, i), item, errors);
            }
        }
    }
}
