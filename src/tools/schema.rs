//! JSON Schema 生成（schemars）
//!
//! 工具参数（tools[].function.parameters）与结构化输出（response_format.json_schema）共用同一个生成器：
//! draft-07、子 schema 内联、去掉顶层 `$schema`。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 为类型 T 生成可直接发给 provider 的 JSON Schema
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let gen = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let schema = gen.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Inner {
        value: u8,
    }

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Outer {
        /// 查询文本
        query: String,
        inner: Inner,
        tags: Option<Vec<String>>,
    }

    #[test]
    fn test_schema_inlines_and_strips_meta() {
        let schema = json_schema_for::<Outer>();
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("definitions").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["inner"]["type"], "object");
        assert_eq!(schema["properties"]["query"]["description"], "查询文本");
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "query"));
        assert!(!required.iter().any(|r| r == "tags"));
    }
}
