// Copyright 2025 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Adjudicator-wide policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Shortest timeout window `open` accepts, in seconds.
    pub min_timeout: u64,
    /// Longest timeout window `open` accepts, in seconds.
    pub max_timeout: u64,
    /// Reject signed states that change `balance_a + balance_b`. Off by
    /// default: two consenting signatures may redistribute freely.
    pub enforce_conservation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_timeout: 0,
            max_timeout: u64::MAX,
            enforce_conservation: false,
        }
    }
}

impl Config {
    pub fn with_timeout_bounds(mut self, min_timeout: u64, max_timeout: u64) -> Self {
        self.min_timeout = min_timeout;
        self.max_timeout = max_timeout;
        self
    }

    pub fn with_conservation(mut self, enforce: bool) -> Self {
        self.enforce_conservation = enforce;
        self
    }

    pub fn accepts_timeout(&self, timeout: u64) -> bool {
        (self.min_timeout..=self.max_timeout).contains(&timeout)
    }
}
