pub mod handler;
pub mod registry;
pub mod validation;

pub use handler::{ResponseMode, ToolHandler, TypedHandler};
pub use registry::{RegisteredTool, ToolRegistry};
