//! Shared process plumbing for the sequencer binaries.

pub mod logging;
