//! Remote page API — posts, comments, and replies.

pub mod api;
pub mod client;

pub use api::{Author, Comment, PageApi, Post};
pub use client::{GraphClient, REPLY_LOG_TARGET};
