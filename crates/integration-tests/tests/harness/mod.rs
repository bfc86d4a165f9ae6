#![allow(dead_code)]

pub mod config;
pub mod fake_upstream;
pub mod server;
