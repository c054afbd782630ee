//! 工具层：强类型工具集、串行执行器、JSON Schema 生成

pub mod executor;
pub mod registry;
pub mod schema;

pub use executor::execute_call;
pub use registry::{
    parse_input, resolve_tool, tool_definition, ToolError, ToolInput, ToolInputError, Toolset,
};
pub use schema::json_schema_for;
