use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub active_simulations: IntGauge,
    pub simulation_ticks_total: IntCounterVec,
    pub deliveries_completed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignments by mode and outcome"),
            &["mode", "outcome"],
        )
        .expect("valid assignments_total metric");

        let active_simulations =
            IntGauge::new("active_simulations", "Delivery simulations currently running")
                .expect("valid active_simulations metric");

        let simulation_ticks_total = IntCounterVec::new(
            Opts::new("simulation_ticks_total", "Simulation ticks by outcome"),
            &["outcome"],
        )
        .expect("valid simulation_ticks_total metric");

        let deliveries_completed_total = IntCounter::new(
            "deliveries_completed_total",
            "Deliveries that reached the completed state",
        )
        .expect("valid deliveries_completed_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(active_simulations.clone()))
            .expect("register active_simulations");
        registry
            .register(Box::new(simulation_ticks_total.clone()))
            .expect("register simulation_ticks_total");
        registry
            .register(Box::new(deliveries_completed_total.clone()))
            .expect("register deliveries_completed_total");

        Self {
            registry,
            assignments_total,
            active_simulations,
            simulation_ticks_total,
            deliveries_completed_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
