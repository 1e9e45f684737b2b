//! Cross-layer tests and shared test doubles

pub(crate) mod support;

mod concurrency;
