// Breadth-first frontier with scope, depth, page-cap and circuit-breaker rules.
//
// The frontier is plain data. Shared use goes through a single
// `tokio::sync::Mutex<Frontier>` owned by the crawl loop, which makes
// enqueue/dequeue and the visited check atomic across workers.

use crate::scope::{Scope, normalize_url};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierLimits {
    pub max_pages: usize,
    pub max_depth: usize,
    pub failure_threshold: usize,
}

#[derive(Debug)]
pub struct Frontier {
    scope: Scope,
    limits: FrontierLimits,
    queue: VecDeque<FrontierEntry>,
    /// Every normalized URL ever accepted. Never shrinks.
    visited: HashSet<String>,
    dequeued: Vec<String>,
    in_flight: usize,
    consecutive_failures: usize,
    tripped: bool,
}

impl Frontier {
    pub fn new(scope: Scope, limits: FrontierLimits) -> Self {
        Self {
            scope,
            limits,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            dequeued: Vec::new(),
            in_flight: 0,
            consecutive_failures: 0,
            tripped: false,
        }
    }

    /// Offer a URL. Returns false, with no side effect, when it was already
    /// seen, is too deep, has a blocked extension or is out of scope.
    pub fn enqueue(&mut self, url: &str, depth: usize) -> bool {
        let Some(normalized) = normalize_url(url) else {
            return false;
        };
        if self.visited.contains(&normalized) {
            return false;
        }
        if depth > self.limits.max_depth {
            debug!("Rejecting {} at depth {} (max {})", normalized, depth, self.limits.max_depth);
            return false;
        }
        if !self.scope.admits(&normalized) {
            debug!("Rejecting {}: out of scope", normalized);
            return false;
        }

        self.visited.insert(normalized.clone());
        self.queue.push_back(FrontierEntry {
            url: normalized,
            depth,
        });
        true
    }

    /// Pop the next entry in FIFO order, or `None` when the queue is empty
    /// or the run is done.
    pub fn next(&mut self) -> Option<FrontierEntry> {
        if self.tripped || self.dequeued.len() >= self.limits.max_pages {
            return None;
        }
        let entry = self.queue.pop_front()?;
        self.dequeued.push(entry.url.clone());
        self.in_flight += 1;
        Some(entry)
    }

    /// Report the end of a visit handed out by [`Frontier::next`].
    /// `navigated` is false when the page could not be loaded at all.
    pub fn complete(&mut self, navigated: bool) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if navigated {
            self.consecutive_failures = 0;
            return;
        }

        self.consecutive_failures += 1;
        if !self.tripped && self.consecutive_failures >= self.limits.failure_threshold {
            warn!(
                "{} consecutive navigation failures, stopping the crawl",
                self.consecutive_failures
            );
            self.tripped = true;
        }
    }

    /// True once the page cap is reached, the breaker has tripped, or the
    /// queue is empty with no visit still able to add to it.
    pub fn is_done(&self) -> bool {
        self.tripped
            || self.dequeued.len() >= self.limits.max_pages
            || (self.queue.is_empty() && self.in_flight == 0)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn contains(&self, url: &str) -> bool {
        normalize_url(url)
            .map(|n| self.visited.contains(&n))
            .unwrap_or(false)
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    /// URLs handed out for visiting, in dispatch order.
    pub fn dequeued(&self) -> &[String] {
        &self.dequeued
    }
}
