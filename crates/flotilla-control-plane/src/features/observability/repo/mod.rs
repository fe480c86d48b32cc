use prometheus::{
    opts, Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Registry, TextEncoder,
};

/// Prometheus registry holding the scaling metrics
pub struct ObservabilityRepository {
    registry: Registry,
    instances_started_total: Counter,
    instances_removed_total: Counter,
    operation_failures_total: CounterVec,
    service_replicas: GaugeVec,
    scale_duration_seconds: Histogram,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let instances_started_total = Counter::with_opts(opts!(
            "flotilla_instances_started_total",
            "Instances created and started"
        ))
        .map_err(|e| e.to_string())?;
        let instances_removed_total = Counter::with_opts(opts!(
            "flotilla_instances_removed_total",
            "Instances stopped and removed"
        ))
        .map_err(|e| e.to_string())?;
        let operation_failures_total = CounterVec::new(
            opts!(
                "flotilla_operation_failures_total",
                "Failed runtime operations"
            ),
            &["operation"],
        )
        .map_err(|e| e.to_string())?;
        let service_replicas = GaugeVec::new(
            opts!(
                "flotilla_service_replicas",
                "Live replicas per service after the last scale operation"
            ),
            &["service"],
        )
        .map_err(|e| e.to_string())?;
        let scale_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "flotilla_scale_duration_seconds",
            "Wall time of a scale operation (seconds)",
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(instances_started_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(instances_removed_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(operation_failures_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(service_replicas.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(scale_duration_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            instances_started_total,
            instances_removed_total,
            operation_failures_total,
            service_replicas,
            scale_duration_seconds,
        })
    }

    pub fn inc_instances_started(&self) {
        self.instances_started_total.inc();
    }

    pub fn inc_instances_removed(&self) {
        self.instances_removed_total.inc();
    }

    pub fn inc_operation_failure(&self, operation: &str) {
        self.operation_failures_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn set_service_replicas(&self, service: &str, replicas: u32) {
        self.service_replicas
            .with_label_values(&[service])
            .set(f64::from(replicas));
    }

    pub fn observe_scale_duration(&self, seconds: f64) {
        self.scale_duration_seconds.observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
