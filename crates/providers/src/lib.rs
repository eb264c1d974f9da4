//! Provider contract and the OpenAI-compatible streaming adapter.
//!
//! The core depends only on [`ChatProvider`]: an ordered stream of text
//! deltas, tool calls, and a finish marker. The single concrete adapter
//! speaks the OpenAI chat-completions wire format, which covers llama.cpp,
//! Ollama, vLLM, LM Studio, and friends.

mod openai_compat;
mod sse;
mod traits;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatProvider, ChatRequest, ResponseFormat};
