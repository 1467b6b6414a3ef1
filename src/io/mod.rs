//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `region_feed` - JSONL region feed produced by the foreground extractor
//! - `egress` - Count and transit output to file (JSONL format)
//! - `egress_channel` - Bounded channel feeding the egress writer
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod egress_channel;
pub mod prometheus;
pub mod region_feed;

// Re-export commonly used types
pub use egress::{new_run_id, Egress};
pub use egress_channel::{create_egress_channel, EgressRecord, EgressSender};
pub use region_feed::FeedReader;
