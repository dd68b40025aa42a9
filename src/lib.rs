#[macro_use]
extern crate tracing;

pub mod collector;
pub mod config;
pub mod cycle;
pub mod dispatch;
pub mod info;
pub mod selector;
pub mod trace;
