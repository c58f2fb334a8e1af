//! End-to-end test harness for the reconstruction pipeline: loads a test-case
//! descriptor, runs the server and client stages, and compares the result
//! against a reference dataset.

pub mod compare;
pub mod config;
pub mod dataset;
pub mod descriptor;
pub mod domain;
pub mod environment;
pub mod harness;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod report;
