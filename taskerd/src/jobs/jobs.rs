/* -------------------------------------------------------------------------- *\
 *                           Tasker Process Runner                            *
 * -------------------------------------------------------------------------- *
 * Copyright 2024 - 2026, the tasker contributors                             *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::sync::Arc;

use super::job::Job;

type Cache = HashMap<String, Arc<Job>>;

/// The in-memory registry of jobs started on this server.
///
/// The registry is the sole owner of jobs and never evicts: terminal jobs
/// remain queryable for the lifetime of the server.
#[derive(Debug, Default)]
pub struct Jobs {
    cache: Cache,
}

impl Jobs {
    pub fn insert(&mut self, job: Arc<Job>) {
        let _ = self.cache.insert(job.id().to_owned(), job);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.cache.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Job>> {
        self.cache.values().cloned().collect()
    }
}
