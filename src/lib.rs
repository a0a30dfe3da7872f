//! Symptom triage assistant.
//!
//! A turn flows from a channel ([`comms`]) into the [`triage`] dispatcher,
//! which routes it to the diagnostic [`tools`] and the [`knowledge`] store,
//! then asks the [`llm`] to compose the reply.

pub mod comms;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod logger;
pub mod prompt;
pub mod runtime;
pub mod tools;
pub mod triage;
