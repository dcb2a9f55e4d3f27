//! Core engine of the adaptive spoken-interview service.
//!
//! The crate is organised leaves-first: text primitives ([`nlp`],
//! [`embedding`]) feed the [`metadata`] builder; the [`llm`] gateway and the
//! [`importer`] produce enriched questions for the [`store`]; the
//! [`coverage`] detectors and the per-session controller in [`session`]
//! drive the follow-up / advance decision loop; [`registry`] owns the
//! sessions. HTTP transport lives in the `interview-api` service crate.

pub mod config;
pub mod coverage;
pub mod embedding;
pub mod importer;
pub mod llm;
pub mod metadata;
pub mod nlp;
pub mod question;
pub mod reflection;
pub mod registry;
pub mod session;
pub mod store;
pub mod topic;

pub use config::{DetectorKind, EngineConfig};
pub use question::{Question, QuestionMeta};
pub use session::{AnswerOutcome, CurrentQuestion, InterviewSession, QuestionKind};
