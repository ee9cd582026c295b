#![doc = include_str!("../README.md")]

mod config;
mod error;
mod handler;
mod master;
mod message;
mod queue;
mod signal;
mod worker;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::handler::*;
pub use crate::master::*;
pub use crate::message::*;
pub use crate::queue::*;
pub use crate::signal::*;
pub use crate::worker::*;
