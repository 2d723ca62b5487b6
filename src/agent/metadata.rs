//! Agent 元数据（构建后不可变）

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 调用方可见的输入 / 输出字段说明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl IoDescriptor {
    pub fn new(name: impl Into<String>, type_: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_: type_.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    /// 工具循环使用的模型；为空时用客户端配置的模型
    #[serde(default)]
    pub large_model_id: Option<String>,
    /// 轻量任务（摘要等）使用的模型
    #[serde(default)]
    pub small_model_id: Option<String>,
    #[serde(default)]
    pub inputs: Vec<IoDescriptor>,
    #[serde(default)]
    pub outputs: Vec<IoDescriptor>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 依赖的外部 API（如 CoinGecko）
    #[serde(default)]
    pub external_apis: Vec<String>,
    /// 示例问题
    #[serde(default)]
    pub examples: Vec<String>,
}

impl AgentMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            author: "unknown".to_string(),
            description: String::new(),
            large_model_id: None,
            small_model_id: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tags: Vec::new(),
            external_apis: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn large_model(mut self, model_id: impl Into<String>) -> Self {
        self.large_model_id = Some(model_id.into());
        self
    }

    pub fn small_model(mut self, model_id: impl Into<String>) -> Self {
        self.small_model_id = Some(model_id.into());
        self
    }

    pub fn input(mut self, input: IoDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: IoDescriptor) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn external_api(mut self, api: impl Into<String>) -> Self {
        self.external_apis.push(api.into());
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_serializes_models_and_io() {
        let meta = AgentMetadata::new("Price Agent")
            .large_model("large-model")
            .input(IoDescriptor::new("query", "str", "Natural language query"))
            .input(IoDescriptor::new("raw_data_only", "bool", "Skip the model summary").with_default(json!(false)))
            .output(IoDescriptor::new("data", "dict", "Structured tool results"));

        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["large_model_id"], "large-model");
        assert!(v["small_model_id"].is_null());
        assert_eq!(v["inputs"][0], json!({"name": "query", "description": "Natural language query", "type": "str"}));
        assert_eq!(v["inputs"][1]["default"], false);
        assert_eq!(v["outputs"][0]["type"], "dict");

        let back: AgentMetadata = serde_json::from_value(v).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_older_metadata_without_new_fields_still_loads() {
        let meta: AgentMetadata = serde_json::from_value(json!({
            "name": "Old", "version": "0.1.0", "author": "x", "description": ""
        }))
        .unwrap();
        assert!(meta.large_model_id.is_none());
        assert!(meta.inputs.is_empty());
    }
}
