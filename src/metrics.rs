use metrics::{counter, histogram};
use tracing::trace;

// Recorded through the `metrics` facade so the Prometheus recorder installed in
// `main` renders them at `/metrics`; each also leaves a trace event.

pub fn inc_requests(route: &'static str) {
    counter!("halcon_requests_total", "route" => route).increment(1);
    trace!(
        target = "halcon.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("halcon_stage_duration_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "halcon.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn stream_emission(items: usize) {
    counter!("halcon_stream_emissions_total").increment(1);
    histogram!("halcon_stream_emission_items").record(items as f64);
    trace!(
        target = "halcon.metrics",
        items = items as u64,
        "stream_emission"
    );
}
