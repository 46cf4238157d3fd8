#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod loader;
pub mod splitter;
pub mod traits;
pub mod types;
