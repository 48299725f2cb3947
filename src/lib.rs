//! Blog post data access with a live cache.
//!
//! [`application::posts::PostService`] validates and forwards operations to a
//! [`application::repos::PostStore`]; [`cache::PostCache`] keeps listings and
//! single posts in observable stale-while-revalidate entries, and
//! [`cache::RealtimeBridge`] feeds the store's change stream into it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
