//! The Responses dialect: item-based input and output, `response.*` events.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;
