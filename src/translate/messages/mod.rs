//! The Messages dialect: content-block based, `message_*` / `content_block_*` events.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;
