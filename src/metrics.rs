use tracing::trace;

// Counters and timings are emitted as trace events; the Prometheus recorder
// installed by the server renders whatever a registered exporter collects.

pub fn inc_requests(route: &'static str) {
    trace!(target = "export.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "export.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn group_finished(success: bool) {
    trace!(
        target = "export.metrics",
        outcome = if success { "success" } else { "failure" },
        "groups_total_inc"
    );
}

pub fn images_fetched(keys: usize, records: usize) {
    trace!(
        target = "export.metrics",
        keys = keys as u64,
        records = records as u64,
        "images_fetched"
    );
}
