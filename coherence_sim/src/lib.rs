pub mod bus;
pub mod cache;
pub mod common;
pub mod config;
pub mod event;
pub mod line;
pub mod message;
pub mod protocol;
pub mod set;
pub mod sim;
pub mod trace;

#[cfg(feature = "stat")]
pub mod stat;
