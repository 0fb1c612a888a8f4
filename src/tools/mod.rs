// Tool descriptors and argument inference

pub mod infer;
pub mod types;

pub use infer::{infer, plan_call, CallInput, SchemaShape};
pub use types::{find_tool, ToolDescriptor};
