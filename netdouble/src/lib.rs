#[macro_use]
extern crate tracing;

pub mod api;
pub mod collector;
pub mod config;
pub mod fixture;
pub mod responder;
pub mod service;

use netdouble_log::StaticLogConfig;

pub struct NetDoubleLog;

impl StaticLogConfig for NetDoubleLog {
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "netdouble";
}
