// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::address_::Address;

/// Picks the server with the fewest connections currently in use.
///
/// Ties are broken round-robin: the scan start rotates on every call so that
/// equally loaded servers take turns.
#[derive(Debug, Default)]
pub(crate) struct LeastConnectedStrategy {
    offset: AtomicUsize,
}

impl LeastConnectedStrategy {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn select<'a>(
        &self,
        candidates: &'a [Arc<Address>],
        mut in_use: impl FnMut(&Address) -> usize,
    ) -> Option<&'a Arc<Address>> {
        if candidates.is_empty() {
            return None;
        }
        let start = self.offset.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let mut best: Option<(&'a Arc<Address>, usize)> = None;
        for i in 0..candidates.len() {
            let candidate = &candidates[(start + i) % candidates.len()];
            let usage = in_use(candidate);
            match best {
                Some((_, best_usage)) if best_usage <= usage => {}
                _ => best = Some((candidate, usage)),
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(hosts: &[&str]) -> Vec<Arc<Address>> {
        hosts
            .iter()
            .map(|host| Arc::new(Address::from(*host)))
            .collect()
    }

    #[test]
    fn test_empty_candidates_select_nothing() {
        let strategy = LeastConnectedStrategy::new();
        assert_eq!(strategy.select(&[], |_| 0), None);
    }

    #[test]
    fn test_selects_least_connected() {
        let strategy = LeastConnectedStrategy::new();
        let candidates = addrs(&["host1", "host2", "host3"]);
        let selected = strategy
            .select(&candidates, |addr| match addr.host() {
                "host1" => 3,
                "host2" => 1,
                _ => 2,
            })
            .unwrap();
        assert_eq!(selected.host(), "host2");
    }

    #[test]
    fn test_round_robin_on_equal_load() {
        let strategy = LeastConnectedStrategy::new();
        let candidates = addrs(&["host1", "host2"]);
        let first = strategy.select(&candidates, |_| 0).unwrap().host();
        let second = strategy.select(&candidates, |_| 0).unwrap().host();
        let third = strategy.select(&candidates, |_| 0).unwrap().host();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_single_candidate() {
        let strategy = LeastConnectedStrategy::new();
        let candidates = addrs(&["host1"]);
        for _ in 0..3 {
            assert_eq!(strategy.select(&candidates, |_| 7).unwrap().host(), "host1");
        }
    }
}
