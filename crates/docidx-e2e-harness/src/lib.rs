//! End-to-end harness for the document indexing and hybrid search
//! subsystem (spec §8): drives `docidx-relay`, `docidx-consumer`, and
//! `docidx-pipeline` directly against in-memory fakes to exercise the
//! seed scenarios that need more than one component wired together.

pub mod fakes;
pub mod harness;
pub mod transcript;

pub use harness::{run_s3_idempotent_replay, run_s5_partial_failure, run_s6_publish_failure, HarnessError, HarnessResult};
pub use transcript::{HarnessTranscript, TranscriptEntry, TranscriptEntryKind};
