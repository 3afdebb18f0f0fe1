//! Test doubles for the remote modelling service.
//!
//! The fakes are thread-safe, record every call they receive and answer from
//! scripts prepared by the test.

pub mod fake_push;
pub mod fake_remote;

pub use fake_push::{FakePushChannel, FakePushFeed};
pub use fake_remote::{
    checker_status, FakeResultsRemote, FakeSchematisationRemote, FakeSimulationRemote, RemoteCall,
};

use hydrolink_protocol::{RemoteTaskStatus, SubJob};

/// A sub-job in the given state.
pub fn subjob(name: &str, status: &str) -> SubJob {
    SubJob {
        name: name.to_string(),
        status: RemoteTaskStatus::from(status),
        detail: None,
    }
}
