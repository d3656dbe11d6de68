//! viscell — automated visual-inspection test runner.
//!
//! Reads an ordered list of inspection steps, dispatches each to a hardware
//! vision-inspection device driver, collects a structured pass/fail result
//! and optional captured image per step, and emits one aggregated judgement
//! document for the whole run.
//!
//! Stdout carries exactly one JSON document; all diagnostics go to stderr.

pub mod artifact;
pub mod config;
pub mod devices;
pub mod error;
pub mod input;
pub mod report;
pub mod runner;
