pub mod backoff;
pub(crate) mod lock;
