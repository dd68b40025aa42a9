#![allow(dead_code)]

mod logs;
mod mock;
mod trace;

pub use logs::Logs;
pub use mock::{MockRedis, bulk, unused_port};
pub use trace::trace_init;
