/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Generated protobuf definitions for the Tasker API.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod tasker {
    tonic::include_proto!("tasker.v0");
}
