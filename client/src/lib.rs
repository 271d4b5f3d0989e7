/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Client library for Tasker.
//!
//! Manages the certificate material on the local filesystem, authenticates
//! with a remote Tasker server over mutual TLS, and exposes typed wrappers
//! for each RPC.

#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(missing_debug_implementations, trivial_casts, unused_results)]
#![warn(clippy::unwrap_used)]

pub mod config;
pub mod identity;

mod client;

pub use client::{ClientError, TaskerClient};
