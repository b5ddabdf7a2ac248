//! Request handling result types.
//!
//! - [`GetResult`], [`GetNextResult`] - registry lookup outcomes
//! - [`SetResult`] - outcome of a value check or SET phase, returned by
//!   binding validators
//! - [`Response`] - Response contents built by the dispatcher

mod results;

pub use results::{GetNextResult, GetResult, Response, SetResult};
