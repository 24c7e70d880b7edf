//! Data types for the scan engine.

pub mod config;
pub mod job;
pub mod output;
pub mod page;
pub mod report;
pub mod scan;
