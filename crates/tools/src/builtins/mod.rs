//! Built-in tools: Shell and Web, per the Tool capability's fixed set.

mod shell;
mod web;

pub use shell::ShellTool;
pub use web::WebTool;
