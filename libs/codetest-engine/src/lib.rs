//! Execution core: run untrusted code against test cases and judge the results.
//!
//! - [`runner`] executes one (code, input) pair under a deadline
//! - [`dispatcher`] fans a submission out to the runner and fans results back in
//! - [`evaluator`] turns raw outcomes into a [`Report`](codetest_common::types::Report)
//! - [`executor`] wires the three together from a `ServiceConfig`

pub mod dispatcher;
pub mod evaluator;
pub mod executor;
pub mod runner;
pub mod scratch;

pub use dispatcher::Dispatcher;
pub use executor::Executor;
pub use runner::{ProcessRunner, Runner};
