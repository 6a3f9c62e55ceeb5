#![warn(missing_docs)]

//! hacfg management library: quorum device certificate distribution, quorum
//! configuration and cluster alerts.

pub mod alert;
pub mod commands;
pub mod communication;
pub mod config;
pub mod corosync;
pub mod env;
pub mod external;
pub mod node;
pub mod qdevice;
pub mod reports;
pub mod service;
pub mod testing;

pub use config::HacfgConfig;
pub use env::{ClusterType, LibraryEnvironment};
pub use reports::{LibraryError, ReportCode, ReportItem, ReportItemSeverity, ReportProcessor};
