// Re-export the session-independent core
pub use tgcore::{api, auth, content, reading, records};

pub mod bridge;
pub mod config;
pub mod download;
pub mod metadata;
pub mod prompt;
pub mod queue;
pub mod reader;
pub mod recorder;
pub mod request;
pub mod session;
pub mod store;
pub mod writer;

// Mocks for the session collaborator; also used by the integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use recorder::{PollTiming, Recorder, RecorderBuilder, RecorderError};
