pub mod completion;
pub mod config;
pub mod context;
pub mod history;
pub mod narrative;
pub mod narrative_tools;
pub mod orchestrator;
pub mod persona;
pub mod subagent;
pub mod subagent_tool;
pub mod tool;

pub use completion::*;
pub use config::*;
pub use context::*;
pub use history::{HistoryEntry, SharedHistory, Speaker};
pub use narrative::*;
pub use narrative_tools::*;
pub use orchestrator::*;
pub use persona::*;
pub use subagent::*;
pub use subagent_tool::*;
pub use tool::*;
