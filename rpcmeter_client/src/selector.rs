use std::collections::HashMap;

use jumphash::JumpHasher;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rpcmeter_protocol::{EndpointUrl, LoadBalance};

/// Chooses among the eligible providers for a single call.
///
/// `select` returns an index into `endpoints`, or `None` when the slice is
/// empty. Strategies that track load are told when an invocation starts and
/// completes.
pub trait Selector: Send {
    fn select(&mut self, endpoints: &[EndpointUrl], invocation_key: &str) -> Option<usize>;

    fn on_start(&mut self, _endpoint: &EndpointUrl) {}
    fn on_complete(&mut self, _endpoint: &EndpointUrl) {}
}

pub fn selector_for(policy: LoadBalance) -> Box<dyn Selector> {
    match policy {
        LoadBalance::Random => Box::new(RandomSelector::new()),
        LoadBalance::RoundRobin => Box::new(RoundRobinSelector::default()),
        LoadBalance::LeastActive => Box::new(LeastActiveSelector::new()),
        LoadBalance::ConsistentHash => Box::new(ConsistentHashSelector::new()),
    }
}

pub struct RandomSelector {
    rng: StdRng,
}

impl RandomSelector {
    pub fn new() -> Self {
        RandomSelector {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for RandomSelector {
    fn select(&mut self, endpoints: &[EndpointUrl], _invocation_key: &str) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        Some(self.rng.gen_range(0..endpoints.len()))
    }
}

#[derive(Default)]
pub struct RoundRobinSelector {
    next: usize,
}

impl Selector for RoundRobinSelector {
    fn select(&mut self, endpoints: &[EndpointUrl], _invocation_key: &str) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        let idx = self.next % endpoints.len();
        self.next = self.next.wrapping_add(1);
        Some(idx)
    }
}

/// Prefers the provider with the fewest in-flight invocations, random
/// tie-break among the least loaded.
pub struct LeastActiveSelector {
    active: HashMap<String, usize>,
    rng: StdRng,
}

impl LeastActiveSelector {
    pub fn new() -> Self {
        LeastActiveSelector {
            active: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for LeastActiveSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for LeastActiveSelector {
    fn select(&mut self, endpoints: &[EndpointUrl], _invocation_key: &str) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        let least = endpoints
            .iter()
            .map(|ep| self.active.get(&ep.authority()).copied().unwrap_or(0))
            .min()
            .unwrap_or(0);
        let candidates: Vec<usize> = endpoints
            .iter()
            .enumerate()
            .filter(|(_, ep)| self.active.get(&ep.authority()).copied().unwrap_or(0) == least)
            .map(|(i, _)| i)
            .collect();
        Some(candidates[self.rng.gen_range(0..candidates.len())])
    }

    fn on_start(&mut self, endpoint: &EndpointUrl) {
        *self.active.entry(endpoint.authority()).or_insert(0) += 1;
    }

    fn on_complete(&mut self, endpoint: &EndpointUrl) {
        if let Some(count) = self.active.get_mut(&endpoint.authority()) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Jump-consistent-hash over the invocation key, so identical calls land on
/// the same provider while the candidate list is stable.
pub struct ConsistentHashSelector {
    hasher: JumpHasher,
}

impl ConsistentHashSelector {
    pub fn new() -> Self {
        // fixed keys: replayed invocations must hash identically across runs
        ConsistentHashSelector {
            hasher: JumpHasher::new_with_keys(0x9e37_79b9, 0x7f4a_7c15),
        }
    }
}

impl Default for ConsistentHashSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for ConsistentHashSelector {
    fn select(&mut self, endpoints: &[EndpointUrl], invocation_key: &str) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        Some(self.hasher.slot(&invocation_key, endpoints.len() as u32) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: u16) -> Vec<EndpointUrl> {
        (0..n)
            .map(|i| EndpointUrl::new("dubbo", "10.0.0.1", 20880 + i))
            .collect()
    }

    #[test]
    fn empty_candidate_list_selects_nothing() {
        for policy in [
            LoadBalance::Random,
            LoadBalance::RoundRobin,
            LoadBalance::LeastActive,
            LoadBalance::ConsistentHash,
        ] {
            assert_eq!(selector_for(policy).select(&[], "k"), None);
        }
    }

    #[test]
    fn random_stays_in_range() {
        let endpoints = peers(3);
        let mut s = RandomSelector::new();
        for _ in 0..50 {
            assert!(s.select(&endpoints, "k").unwrap() < 3);
        }
    }

    #[test]
    fn round_robin_cycles() {
        let endpoints = peers(3);
        let mut s = RoundRobinSelector::default();
        let picks: Vec<usize> = (0..6).map(|_| s.select(&endpoints, "k").unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn least_active_prefers_idle_providers() {
        let endpoints = peers(3);
        let mut s = LeastActiveSelector::new();
        s.on_start(&endpoints[0]);
        s.on_start(&endpoints[2]);
        for _ in 0..20 {
            assert_eq!(s.select(&endpoints, "k"), Some(1));
        }
        s.on_complete(&endpoints[0]);
        s.on_start(&endpoints[1]);
        // 0 is idle again, 1 and 2 each have one in flight
        for _ in 0..20 {
            assert_eq!(s.select(&endpoints, "k"), Some(0));
        }
    }

    #[test]
    fn consistent_hash_is_stable() {
        let endpoints = peers(8);
        let mut a = ConsistentHashSelector::new();
        let mut b = ConsistentHashSelector::new();
        for key in ["com.example.Foo#bar", "com.example.Foo#baz", "x", "y"] {
            let pick = a.select(&endpoints, key).unwrap();
            assert!(pick < 8);
            assert_eq!(b.select(&endpoints, key), Some(pick));
            assert_eq!(a.select(&endpoints, key), Some(pick));
        }
    }
}
