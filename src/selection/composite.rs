//! An ordered pipeline of filters followed by a selector primitive
//! (spec.md §4.2 Composite).

use super::{SelectionContext, Strategy};
use crate::proxy::ProxyView;
use std::sync::Arc;

/// A pure predicate over one candidate. Filters run left-to-right and are
/// purely additive restrictions; a candidate must pass every filter to
/// remain in the set handed to the selector.
pub type Filter = Arc<dyn Fn(&ProxyView, &SelectionContext) -> bool + Send + Sync>;

pub struct CompositeStrategy {
    filters: Vec<Filter>,
    selector: Arc<dyn Strategy>,
}

impl CompositeStrategy {
    pub fn new(selector: Arc<dyn Strategy>) -> Self {
        Self { filters: Vec::new(), selector }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl Strategy for CompositeStrategy {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let filtered: Vec<ProxyView> = candidates
            .iter()
            .filter(|p| self.filters.iter().all(|f| f(p, context)))
            .cloned()
            .collect();
        self.selector.select(&filtered, context)
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Health, StatsSnapshot};
    use crate::selection::RoundRobin;
    use std::collections::BTreeSet;

    fn view(id: &str, tag: &str) -> ProxyView {
        let mut tags = BTreeSet::new();
        tags.insert(tag.to_string());
        ProxyView {
            id: id.to_string(),
            country_code: None,
            region: None,
            tags,
            stats: StatsSnapshot {
                requests_started: 1,
                requests_active: 0,
                requests_completed: 1,
                requests_succeeded: 1,
                requests_failed: 0,
                ema_response_time_ms: Some(10.0),
                consecutive_failures: 0,
                has_succeeded: true,
                last_success_at_millis: Some(0),
            },
            health: Health::Healthy,
        }
    }

    #[test]
    fn filters_run_left_to_right_and_restrict_the_selector() {
        let residential = view("r1", "residential");
        let datacenter = view("d1", "datacenter");
        let composite = CompositeStrategy::new(Arc::new(RoundRobin::new())).with_filter(Arc::new(
            |p: &ProxyView, _: &SelectionContext| p.tags.contains("residential"),
        ));

        let picked = composite.select(&[residential, datacenter], &SelectionContext::new());
        assert_eq!(picked.as_deref(), Some("r1"));
    }

    #[test]
    fn empty_filtered_set_yields_none() {
        let datacenter = view("d1", "datacenter");
        let composite = CompositeStrategy::new(Arc::new(RoundRobin::new())).with_filter(Arc::new(
            |p: &ProxyView, _: &SelectionContext| p.tags.contains("residential"),
        ));
        assert_eq!(composite.select(&[datacenter], &SelectionContext::new()), None);
    }
}
