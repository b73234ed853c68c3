//! Core runtime for the hookguard sidecar: circuit breaking, damage-control
//! policy, request classification, transcript parsing, context compaction, the
//! knowledge pipeline, LLM provider fallback, and event dispatch.

pub mod breaker;
pub mod classifier;
pub mod compaction;
pub mod dispatcher;
pub mod envelope;
pub mod knowledge;
pub mod llm;
pub mod policy;
pub mod state;
pub mod transcript;
