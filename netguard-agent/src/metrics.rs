use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub watch_events: Family<WatchEventLabels, Counter>,
    pub watch_restarts: Family<ResourceLabels, Counter>,
    pub map_operations: Family<MapOperationLabels, Counter>,
    pub reconciliations: Family<StatusLabels, Counter>,
    pub reconcile_duration: Histogram,
    pub requests: Family<RequestLabels, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            watch_events: Family::default(),
            watch_restarts: Family::default(),
            map_operations: Family::default(),
            reconciliations: Family::default(),
            reconcile_duration: Histogram::new(
                [0.001, 0.01, 0.1, 0.25, 0.5, 1.0, 5.0, 15.0].into_iter(),
            ),
            requests: Family::default(),
        }
    }
}

impl Metrics {
    /// Register agent metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "watch_events",
            "Watch events applied to the store",
            self.watch_events.clone(),
        );
        r.register(
            "watch_restarts",
            "Watch subscriptions that ended and went into backoff",
            self.watch_restarts.clone(),
        );
        r.register(
            "map_operations",
            "Kernel map writes and removals",
            self.map_operations.clone(),
        );
        r.register(
            "reconciliations",
            "Full reconciliations of the store",
            self.reconciliations.clone(),
        );
        r.register_with_unit(
            "reconcile_duration",
            "reconcile duration",
            Unit::Seconds,
            self.reconcile_duration.clone(),
        );
        r.register(
            "requests",
            "Requests served on the agent socket",
            self.requests.clone(),
        );
        self
    }

    pub fn count_watch_event(&self, resource: &str, event: &str) {
        self.watch_events
            .get_or_create(&WatchEventLabels {
                resource: resource.into(),
                event: event.into(),
            })
            .inc();
    }

    pub fn count_watch_restart(&self, resource: &str) {
        self.watch_restarts
            .get_or_create(&ResourceLabels {
                resource: resource.into(),
            })
            .inc();
    }

    pub fn count_map_operation(&self, op: &str, ok: bool) {
        self.map_operations
            .get_or_create(&MapOperationLabels {
                op: op.into(),
                status: status(ok),
            })
            .inc();
    }

    pub fn count_request(&self, command: &str, success: bool) {
        self.requests
            .get_or_create(&RequestLabels {
                command: command.into(),
                success: success.to_string(),
            })
            .inc();
    }

    pub fn measure_reconcile(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            ok: false,
            metrics: self.clone(),
        }
    }
}

/// Records one reconciliation when dropped. Counted as a failure unless
/// [`ReconcileMeasurer::succeeded`] was called.
pub struct ReconcileMeasurer {
    start: Instant,
    ok: bool,
    metrics: Metrics,
}

impl ReconcileMeasurer {
    pub fn succeeded(&mut self) {
        self.ok = true;
    }
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metrics.reconcile_duration.observe(duration);
        self.metrics
            .reconciliations
            .get_or_create(&StatusLabels {
                status: status(self.ok),
            })
            .inc();
    }
}

fn status(ok: bool) -> String {
    if ok { "ok".into() } else { "error".into() }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WatchEventLabels {
    pub resource: String,
    pub event: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub resource: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MapOperationLabels {
    pub op: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub command: String,
    pub success: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encoded_families() {
        let mut registry = Registry::with_prefix("netguard");
        let metrics = Metrics::default().register(&mut registry);
        metrics.count_request("ADD", true);
        metrics.count_map_operation("upsert", false);
        {
            let mut m = metrics.measure_reconcile();
            m.succeeded();
        }

        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &registry).unwrap();
        assert!(out.contains(r#"netguard_requests_total{command="ADD",success="true"} 1"#));
        assert!(out.contains(r#"netguard_map_operations_total{op="upsert",status="error"} 1"#));
        assert!(out.contains(r#"netguard_reconciliations_total{status="ok"} 1"#));
    }
}
