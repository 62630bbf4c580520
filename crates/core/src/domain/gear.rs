// Gear Domain Model

use crate::domain::container::FileEntry;
use crate::domain::error::{DomainError, Result};
use crate::domain::pattern::glob_matches;
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Gear ID (opaque)
pub type GearId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GearCategory {
    Converter,
    Classifier,
    Analysis,
    Qa,
    Utility,
}

/// Declared file input
///
/// Every key besides `optional`, `description` and a string `name` is a
/// Draft 4 JSON Schema for the file attribute of the same name, e.g.
/// `"type": {"enum": ["dicom"]}`. A string `name` is a shell glob over the
/// file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInputSpec {
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub constraints: Map<String, Value>,
}

impl FileInputSpec {
    /// Object schema over a file document; constrained attributes must be present
    pub fn file_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .constraints
            .iter()
            .filter(|(key, value)| !(key.as_str() == "name" && value.is_string()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let required: Vec<Value> = properties.keys().cloned().map(Value::String).collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }

    pub fn name_glob(&self) -> Option<&str> {
        self.constraints.get("name").and_then(Value::as_str)
    }

    pub fn matcher(&self) -> Result<FileMatcher> {
        Ok(FileMatcher {
            validator: compile_schema(&self.file_schema())?,
            name_glob: self.name_glob().map(str::to_string),
        })
    }
}

/// Compiled predicate a candidate file must satisfy to fill a file input
pub struct FileMatcher {
    validator: Validator,
    name_glob: Option<String>,
}

impl FileMatcher {
    pub fn accepts(&self, file: &FileEntry) -> bool {
        if let Some(glob) = &self.name_glob {
            if !glob_matches(glob, &file.name) {
                return false;
            }
        }
        match serde_json::to_value(file) {
            Ok(document) => self.validator.is_valid(&document),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextInputSpec {
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyInputSpec {
    #[serde(default)]
    pub read_only: bool,
}

/// Declared gear input, discriminated by `base`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "kebab-case")]
pub enum GearInput {
    File(FileInputSpec),
    Context(ContextInputSpec),
    ApiKey(ApiKeyInputSpec),
}

impl GearInput {
    pub fn is_optional(&self) -> bool {
        match self {
            GearInput::File(spec) => spec.optional,
            GearInput::Context(spec) => spec.optional,
            GearInput::ApiKey(_) => false,
        }
    }
}

/// One entry of the gear config manifest
///
/// `default` and `optional` are manifest bookkeeping. The remaining keys
/// (`type`, `enum`, `minimum`, `pattern`, `items`, ...) are the Draft 4
/// schema for the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub schema: Map<String, Value>,
}

fn compile_schema(schema: &Value) -> Result<Validator> {
    jsonschema::draft4::new(schema)
        .map_err(|e| DomainError::ValidationError(format!("invalid gear manifest schema: {}", e)))
}

/// Gear identity joined onto jobs at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GearInfo {
    pub name: String,
    pub version: String,
    pub category: GearCategory,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Published gear manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gear {
    pub id: GearId,
    pub name: String,
    pub version: String,
    pub category: GearCategory,
    #[serde(default)]
    pub inputs: BTreeMap<String, GearInput>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigField>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Invalidated gears never run
    #[serde(default)]
    pub invalid: bool,
    pub rootfs_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default)]
    pub created: i64,
}

impl Gear {
    pub fn info(&self) -> GearInfo {
        GearInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            category: self.category,
            capabilities: self.capabilities.clone(),
        }
    }

    pub fn file_inputs(&self) -> impl Iterator<Item = (&String, &FileInputSpec)> {
        self.inputs.iter().filter_map(|(name, input)| match input {
            GearInput::File(spec) => Some((name, spec)),
            _ => None,
        })
    }

    pub fn has_file_inputs(&self) -> bool {
        self.file_inputs().next().is_some()
    }

    pub fn has_context_inputs(&self) -> bool {
        self.inputs
            .values()
            .any(|i| matches!(i, GearInput::Context(_)))
    }

    pub fn has_api_key_input(&self) -> bool {
        self.inputs
            .values()
            .any(|i| matches!(i, GearInput::ApiKey(_)))
    }

    pub fn has_optional_inputs(&self) -> bool {
        self.inputs.values().any(GearInput::is_optional)
    }

    /// Required file inputs (optional ones filtered out)
    pub fn required_file_inputs(&self) -> Vec<&str> {
        self.file_inputs()
            .filter(|(_, spec)| !spec.optional)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fill keys missing from `config` with manifest defaults
    pub fn fill_config_defaults(&self, config: &Map<String, Value>) -> Map<String, Value> {
        let mut filled = config.clone();
        for (key, field) in &self.config {
            if let Some(default) = &field.default {
                filled.entry(key.clone()).or_insert_with(|| default.clone());
            }
        }
        filled
    }

    /// Draft 4 schema for the whole config object
    ///
    /// Unknown keys are rejected and every non-optional key is required.
    pub fn config_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .config
            .iter()
            .map(|(key, field)| (key.clone(), Value::Object(field.schema.clone())))
            .collect();
        let required: Vec<Value> = self
            .config
            .iter()
            .filter(|(_, field)| !field.optional)
            .map(|(key, _)| Value::String(key.clone()))
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        });
        // Draft 4 rejects an empty `required` array
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }

    /// Check that every schema the manifest declares compiles
    pub fn validate_manifest(&self) -> Result<()> {
        compile_schema(&self.config_schema())?;
        for (name, spec) in self.file_inputs() {
            spec.matcher().map_err(|e| {
                DomainError::ValidationError(format!("file input {}: {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Validate `config` against the manifest; returns the config with defaults filled
    pub fn validate_config(&self, config: &Map<String, Value>) -> Result<Map<String, Value>> {
        let filled = self.fill_config_defaults(config);
        let validator = compile_schema(&self.config_schema())?;

        let document = Value::Object(filled.clone());
        let problems: Vec<String> = validator
            .iter_errors(&document)
            .map(|error| error.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(DomainError::ValidationError(format!(
                "config did not match manifest: {}",
                problems.join("; ")
            )));
        }

        Ok(filled)
    }
}
