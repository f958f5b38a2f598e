//! Tool definitions: schema, parameter contract, metadata and handler.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::context::ExecutionContext;
use crate::error::WardenError;

/// JSON type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamKind {
    fn json_type(self) -> Option<&'static str> {
        match self {
            ParamKind::String => Some("string"),
            ParamKind::Integer => Some("integer"),
            ParamKind::Number => Some("number"),
            ParamKind::Boolean => Some("boolean"),
            ParamKind::Array => Some("array"),
            ParamKind::Object => Some("object"),
            ParamKind::Any => None,
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// Structured parameter contract of a tool.
///
/// Params are a JSON object; `null` is read as an empty object. Fields not
/// declared here pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub fields: Vec<ParamField>,
}

impl ParameterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
        });
        self
    }

    /// Check presence of required fields and the type of present ones.
    pub fn validate(&self, params: &Value) -> Result<(), String> {
        let empty = Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(format!("parameters must be an object, got {}", type_name(other))),
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required parameter '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' must be {}, got {}",
                        field.name,
                        field.kind.json_type().unwrap_or("any"),
                        type_name(value)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// JSON-schema object for function-calling layers.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            if let Some(t) = field.kind.json_type() {
                prop.insert("type".into(), Value::String(t.into()));
            }
            if field.kind == ParamKind::Array {
                prop.insert("items".into(), json!({}));
            }
            prop.insert("description".into(), Value::String(field.description.clone()));
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `{name, description, parameters}` triple exposed to agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSpec,
}

impl ToolSchema {
    /// Function-calling form with the parameters as JSON schema.
    pub fn to_function_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.to_json_schema(),
        })
    }
}

/// Grouping used to filter which tools a caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Workspace,
    Process,
    Diagnostics,
    Custom(String),
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCategory::Workspace => write!(f, "workspace"),
            ToolCategory::Process => write!(f, "process"),
            ToolCategory::Diagnostics => write!(f, "diagnostics"),
            ToolCategory::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl std::str::FromStr for ToolCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "workspace" => ToolCategory::Workspace,
            "process" => ToolCategory::Process,
            "diagnostics" => ToolCategory::Diagnostics,
            other => ToolCategory::Custom(other.to_string()),
        })
    }
}

/// Who may call a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Public,
    Authenticated,
    /// Authenticated and holding [`PRIVILEGED_PERMISSION`].
    Privileged,
}

pub const PRIVILEGED_PERMISSION: &str = "tools:privileged";

/// Fixed-window call budget per tool and caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub category: ToolCategory,
    pub access_level: AccessLevel,
    pub rate_limit: Option<RateLimit>,
    /// Upper bound on handler run time.
    pub timeout_ms: Option<u64>,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            category: ToolCategory::Custom("general".into()),
            access_level: AccessLevel::Public,
            rate_limit: None,
            timeout_ms: None,
        }
    }
}

/// Verdict of a custom parameter validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Tool-specific parameter check, run after the [`ParameterSpec`] check.
pub trait ParamValidator: Send + Sync {
    fn validate(&self, params: &Value) -> ValidationOutcome;
}

impl<F> ParamValidator for F
where
    F: Fn(&Value) -> ValidationOutcome + Send + Sync,
{
    fn validate(&self, params: &Value) -> ValidationOutcome {
        self(params)
    }
}

/// The code behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError>;
}

/// A registered tool. Cheap to clone.
#[derive(Clone)]
pub struct ToolDefinition {
    pub id: String,
    pub schema: ToolSchema,
    pub metadata: ToolMetadata,
    pub validator: Option<Arc<dyn ParamValidator>>,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .field("metadata", &self.metadata)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl ToolDefinition {
    /// Tool named `id` with no parameters and default metadata.
    pub fn new(id: impl Into<String>, description: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        let id = id.into();
        Self {
            schema: ToolSchema {
                name: id.clone(),
                description: description.into(),
                parameters: ParameterSpec::default(),
            },
            id,
            metadata: ToolMetadata::default(),
            validator: None,
            handler,
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSpec) -> Self {
        self.schema.parameters = parameters;
        self
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.metadata.category = category;
        self
    }

    pub fn with_access(mut self, level: AccessLevel) -> Self {
        self.metadata.access_level = level;
        self
    }

    pub fn with_rate_limit(mut self, max_calls: u32, window_ms: u64) -> Self {
        self.metadata.rate_limit = Some(RateLimit {
            max_calls,
            window_ms,
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.metadata.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_validator(mut self, validator: impl ParamValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Decode params into a typed struct; `null` decodes as `{}`.
pub fn decode_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, WardenError> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| WardenError::validation(e.to_string()))
}
