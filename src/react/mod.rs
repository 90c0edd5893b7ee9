//! ReAct 层：推理步、工具调用合成与主循环

pub mod loop_;
pub mod planner;
pub mod synthesizer;

pub use loop_::{QueryProcessor, DEFAULT_MAX_ITERATIONS};
pub use planner::{extract_tool_requests, Planner, PlannerOutput, DEFAULT_SYSTEM_PROMPT};
pub use synthesizer::{shrink_count, validate_call, RetryStats, ToolCallSynthesizer};
