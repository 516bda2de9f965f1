//! Protocol-adapter helpers shared across providers: client-facing model
//! aliasing (`model_mapping`), request-type resolution (`request_type`),
//! upstream envelope normalization (`envelope`), upstream retry-delay
//! parsing (`retry_delay`), and the background-task downgrade heuristic
//! (`background_task`).

pub mod background_task;
pub mod envelope;
pub mod model_mapping;
pub mod request_type;
pub mod retry_delay;
