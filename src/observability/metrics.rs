use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub claim_latency_seconds: HistogramVec,
    pub order_transitions_total: IntCounterVec,
    pub deliveries_total: IntCounter,
    pub wallet_credited_total: IntCounter,
    pub notification_failures_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Order claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let claim_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "claim_latency_seconds",
                "Latency of the conditional claim update in seconds",
            ),
            &["outcome"],
        )
        .expect("valid claim_latency_seconds metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order state transitions by target state"),
            &["to"],
        )
        .expect("valid order_transitions_total metric");

        let deliveries_total = IntCounter::new("deliveries_total", "Confirmed deliveries")
            .expect("valid deliveries_total metric");

        let wallet_credited_total = IntCounter::new(
            "wallet_credited_total",
            "Currency units credited to courier wallets",
        )
        .expect("valid wallet_credited_total metric");

        let notification_failures_total = IntCounter::new(
            "notification_failures_total",
            "Notifications that could not be published",
        )
        .expect("valid notification_failures_total metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register claim_latency_seconds");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("register deliveries_total");
        registry
            .register(Box::new(wallet_credited_total.clone()))
            .expect("register wallet_credited_total");
        registry
            .register(Box::new(notification_failures_total.clone()))
            .expect("register notification_failures_total");

        Self {
            registry,
            claims_total,
            claim_latency_seconds,
            order_transitions_total,
            deliveries_total,
            wallet_credited_total,
            notification_failures_total,
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
