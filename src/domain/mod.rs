//! Tool catalog and the built-in tools served when no executor is running

pub mod tools;
