//! Utility functions and helpers.

pub mod hash;
pub mod http;
pub mod parse;
pub mod url;
