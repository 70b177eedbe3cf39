//! # Model Output Parser
//!
//! Best-effort recovery of a single JSON value from free-form model output.
//! Handles think blocks, markdown fences, chatty prefixes and suffixes, and
//! responses that contain more than one JSON object.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`recover_json`] | Recover an untyped `Value` |
//! | [`recover_json_as`] | Recover and deserialize into `T` |
//! | [`recover_json_with`] | Recover with [`RecoveryOptions`], returning diagnostics |
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |

pub mod error;
pub mod extract;
pub mod json;

pub use error::ParseError;
pub use extract::strip_think_tags;
pub use json::{
    recover_json, recover_json_as, recover_json_with, CandidateOrder, RecoveryOptions,
};
