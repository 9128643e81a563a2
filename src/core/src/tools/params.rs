use serde_json::{json, Map, Value};

/// JSON-schema description of a tool's arguments, advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameters {
    pub schema: Value,
}

impl ToolParameters {
    pub fn empty() -> Self {
        Self::object().build()
    }

    pub fn object() -> ToolParametersBuilder {
        ToolParametersBuilder::default()
    }

    /// Names listed under `required`.
    pub fn required(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ToolParametersBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ToolParametersBuilder {
    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({ "type": "string", "description": description }),
            required,
        )
    }

    pub fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({ "type": "number", "description": description }),
            required,
        )
    }

    pub fn string_enum(
        self,
        name: &str,
        description: &str,
        values: &[&str],
        required: bool,
    ) -> Self {
        self.property(
            name,
            json!({ "type": "string", "enum": values, "description": description }),
            required,
        )
    }

    pub fn string_array(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "array",
                "items": { "type": "string" },
                "description": description,
            }),
            required,
        )
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: json!({
                "type": "object",
                "properties": Value::Object(self.properties),
                "required": self.required,
                "additionalProperties": false,
            }),
        }
    }
}
