#![allow(clippy::must_use_candidate)]

mod context;
mod error;

pub use context::CallContext;
pub use error::HttpError;
