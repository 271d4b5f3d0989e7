/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

// Skip helpers in the style of nix's test helpers:
// https://github.com/nix-rust/nix/blob/master/test/common/mod.rs

macro_rules! skip {
    ($($reason: expr),+) => {
        use ::std::io::{self, Write};

        let stderr = io::stderr();
        let mut handle = stderr.lock();
        writeln!(handle, $($reason),+).unwrap();
        return;
    }
}

macro_rules! skip_if_not_root {
    ($name:expr) => {
        use nix::unistd::Uid;

        if !Uid::current().is_root() {
            skip!("{} requires root privileges. Skipping test.", $name);
        }
    };
}

macro_rules! skip_if_no_cgroup_v2 {
    ($name:expr) => {
        if !::std::path::Path::new("/sys/fs/cgroup/cgroup.controllers")
            .exists()
        {
            skip!(
                "{} requires the cgroup v2 hierarchy. Skipping test.",
                $name
            );
        }
    };
}
