//! Library commands. Each takes a [`crate::env::LibraryEnvironment`] and
//! reports progress through its report processor.

pub mod qdevice;
pub mod quorum;
