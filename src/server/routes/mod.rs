pub mod antigravity;
pub mod claude;
pub mod codex;
pub mod geminicli;
pub mod openai_chat;
pub mod openai_responses;
