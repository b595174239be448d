//! anchorwatch: test harness for a document network whose streams are
//! anchored asynchronously by a separate service.
//!
//! The centrepiece is the race-safe condition waiter from `anchorwatch-core`;
//! this crate adds configuration and the setup/teardown of a test run.

pub mod config;
pub mod environment;

pub use anchorwatch_anchor::{AnchorBatch, AnchorService};
pub use anchorwatch_core::*;
pub use anchorwatch_stream::*;
pub use config::{AnchorConfig, ConfigError, HarnessConfig, ServiceConfig, ServiceMode};
pub use environment::{init_tracing, EnvironmentError, TestEnvironment};
