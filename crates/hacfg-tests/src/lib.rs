#![warn(missing_docs)]

//! End-to-end scenarios for quorum device provisioning.
//!
//! The harness simulates a qnetd host and the cluster nodes in-process, each
//! with its own certificate databases under a temporary directory.

#[allow(missing_docs)]
pub mod harness;

#[cfg(test)]
mod provisioning_tests;
#[cfg(test)]
mod quorum_scenarios;

pub use harness::{init_test_logging, FakeCertutil, SimulatedCluster, SimulatedHost, TestEnv};
