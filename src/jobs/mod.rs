//! Job domain model and lifecycle service
//!
//! A job moves through a fixed DAG of statuses; the service enforces every
//! transition with a pre-state guard so concurrent writers (a completing
//! worker racing a user cancellation) always resolve to exactly one terminal
//! state.

pub mod model;
pub mod service;

pub use model::{Job, JobStatus};
pub use service::{JobError, JobService, NewJob, Result, MAX_PROMPT_CHARS};
