//! Environment-based runtime tuning.
//!
//! `GRACKLE_STACK_SIZE` sets the stack size for spawned coroutines
//! (connection handlers and pool producers). Accepts decimal (`16384`) or
//! hexadecimal (`0x4000`) values; defaults to 64 KB, which comfortably fits
//! a handler lifecycle with template rendering on top.

use std::env;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 64 KB / 0x10000)
    pub stack_size: usize,
}

const DEFAULT_STACK_SIZE: usize = 0x10000;

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = match env::var("GRACKLE_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
                } else {
                    val.parse().unwrap_or(DEFAULT_STACK_SIZE)
                }
            }
            Err(_) => DEFAULT_STACK_SIZE,
        };
        RuntimeConfig { stack_size }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}
