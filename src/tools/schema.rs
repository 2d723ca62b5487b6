//! 工具 Schema：名称、描述、带类型的参数表与必填子集
//!
//! 注册时用 check 校验 Schema 自身；调用前用 validate_args 校验参数（必填、类型、枚举），并补全默认值。
//! to_function_json 输出 OpenAI function calling 格式，供 LLM 请求使用。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::AgentError;

/// 参数类型（JSON Schema 基本类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// 单个参数的声明
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamType,
    pub description: String,
    pub default: Option<Value>,
    /// 允许的取值（JSON Schema enum）
    pub allowed: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            default: None,
            allowed: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::new(ParamType::Number, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParamType::Boolean, description)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), json!(self.kind.as_str()));
        obj.insert("description".into(), json!(self.description));
        if let Some(default) = &self.default {
            obj.insert("default".into(), default.clone());
        }
        if let Some(allowed) = &self.allowed {
            obj.insert("enum".into(), Value::Array(allowed.clone()));
        }
        Value::Object(obj)
    }
}

/// 工具 Schema：构建后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    name: String,
    description: String,
    parameters: IndexMap<String, ParamSpec>,
    required: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
            required: Vec::new(),
        }
    }

    /// 可选参数
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// 必填参数
    pub fn required_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.parameters.insert(name, spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &IndexMap<String, ParamSpec> {
        &self.parameters
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// 注册时校验 Schema 本身：名称合法、必填参数已声明、默认值与类型一致
    pub fn check(&self) -> Result<(), AgentError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            return Err(AgentError::validation(format!(
                "invalid tool name '{}'",
                self.name
            )));
        }
        for req in &self.required {
            if !self.parameters.contains_key(req) {
                return Err(AgentError::validation(format!(
                    "tool '{}' requires undeclared parameter '{}'",
                    self.name, req
                )));
            }
        }
        for (pname, spec) in &self.parameters {
            if let Some(default) = &spec.default {
                if !spec.kind.matches(default) {
                    return Err(AgentError::validation(format!(
                        "tool '{}' parameter '{}' default does not match type {}",
                        self.name,
                        pname,
                        spec.kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// 校验调用参数并补全默认值；null 视为空参数表，未声明的额外参数原样保留
    pub fn validate_args(&self, args: &Value) -> Result<Map<String, Value>, AgentError> {
        let mut map = match args {
            Value::Null => Map::new(),
            Value::Object(obj) => obj.clone(),
            other => {
                return Err(AgentError::validation(format!(
                    "arguments for '{}' must be an object, got {}",
                    self.name, other
                )))
            }
        };

        for req in &self.required {
            match map.get(req) {
                None | Some(Value::Null) => {
                    return Err(AgentError::validation(format!(
                        "missing required parameter '{}' for tool '{}'",
                        req, self.name
                    )))
                }
                Some(_) => {}
            }
        }

        for (pname, spec) in &self.parameters {
            match map.get(pname) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        map.insert(pname.clone(), default.clone());
                    }
                }
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(AgentError::validation(format!(
                            "parameter '{}' of tool '{}' must be {}",
                            pname,
                            self.name,
                            spec.kind.as_str()
                        )));
                    }
                    if let Some(allowed) = &spec.allowed {
                        if !allowed.contains(value) {
                            return Err(AgentError::validation(format!(
                                "parameter '{}' of tool '{}' must be one of {}",
                                pname,
                                self.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }

        Ok(map)
    }

    /// 参数的 JSON Schema 对象
    pub fn parameters_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(k, spec)| (k.clone(), spec.to_json()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// OpenAI function calling 格式
    pub fn to_function_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_json(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_schema() -> ToolSchema {
        ToolSchema::new("get_price", "Get the current price of a token")
            .required_param("symbol", ParamSpec::string("Token symbol, e.g. ETH"))
            .param(
                "vs_currency",
                ParamSpec::string("Quote currency").with_default(json!("usd")),
            )
            .param(
                "precision",
                ParamSpec::integer("Decimal places").one_of([2, 4, 8]),
            )
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = price_schema().validate_args(&json!({"vs_currency": "eur"})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref m) if m.contains("symbol")));

        let err = price_schema().validate_args(&json!({"symbol": null})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_type_and_enum_checked() {
        let schema = price_schema();
        assert!(schema.validate_args(&json!({"symbol": 1})).is_err());
        assert!(schema.validate_args(&json!({"symbol": "ETH", "precision": 3})).is_err());
        assert!(schema.validate_args(&json!({"symbol": "ETH", "precision": 4})).is_ok());
        assert!(schema.validate_args(&json!(["ETH"])).is_err());
    }

    #[test]
    fn test_defaults_filled() {
        let args = price_schema().validate_args(&json!({"symbol": "ETH"})).unwrap();
        assert_eq!(args.get("vs_currency"), Some(&json!("usd")));
        assert!(args.get("precision").is_none());
    }

    #[test]
    fn test_check_rejects_undeclared_required() {
        let mut schema = ToolSchema::new("broken", "x");
        schema.required.push("ghost".into());
        assert!(schema.check().is_err());
        assert!(ToolSchema::new("bad name", "x").check().is_err());
        assert!(ToolSchema::new("p", "x")
            .param("n", ParamSpec::integer("n").with_default(json!("seven")))
            .check()
            .is_err());
        assert!(price_schema().check().is_ok());
    }

    #[test]
    fn test_function_json_shape() {
        let v = price_schema().to_function_json();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "get_price");
        assert_eq!(v["function"]["parameters"]["required"], json!(["symbol"]));
        assert_eq!(
            v["function"]["parameters"]["properties"]["vs_currency"]["default"],
            "usd"
        );
    }
}
