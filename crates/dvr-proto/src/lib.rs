//! Wire constants, frame codec and shared configuration for the capture
//! service control protocol.

pub mod config;
pub mod platform;
pub mod protocol;
