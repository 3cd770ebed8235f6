#![doc = include_str!("../README.md")]

mod error;

pub mod analysis;
pub mod assemble;
pub mod capture;
pub mod command;
pub mod config;
pub mod framing;
pub mod ledger;
pub mod pipeline;

pub use error::{Error, Result, Unreadable};
