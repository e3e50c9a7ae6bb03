//! Prometheus metrics for the control loop

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

/// Engine metrics
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    pub ticks_total: IntCounter,
    pub ticks_aborted_total: IntCounter,
    pub plans_total: IntCounter,
    pub plans_converged_total: IntCounter,
    pub plans_failed_total: IntCounter,
    pub exceptions_applied_total: IntCounter,
    pub exceptions_rejected_total: IntCounter,
    pub formula_reloads_total: IntCounter,
    pub qos: Gauge,
    pub qos_error: Gauge,
    pub adaptable_components: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            ticks_total: IntCounter::new("bsn_engine_ticks_total", "Control loop ticks")?,
            ticks_aborted_total: IntCounter::new(
                "bsn_engine_ticks_aborted_total",
                "Ticks abandoned on repository or formula errors",
            )?,
            plans_total: IntCounter::new("bsn_engine_plans_total", "Plan phases run")?,
            plans_converged_total: IntCounter::new(
                "bsn_engine_plans_converged_total",
                "Plans that produced an in-band strategy",
            )?,
            plans_failed_total: IntCounter::new(
                "bsn_engine_plans_failed_total",
                "Plans that did not converge",
            )?,
            exceptions_applied_total: IntCounter::new(
                "bsn_engine_exceptions_applied_total",
                "Priority adjustments applied",
            )?,
            exceptions_rejected_total: IntCounter::new(
                "bsn_engine_exceptions_rejected_total",
                "Exceptions rejected as malformed or unknown",
            )?,
            formula_reloads_total: IntCounter::new(
                "bsn_engine_formula_reloads_total",
                "Formula texts installed",
            )?,
            qos: Gauge::new("bsn_engine_qos", "Last evaluated QoS")?,
            qos_error: Gauge::new("bsn_engine_qos_error", "Last set-point error")?,
            adaptable_components: IntGauge::new(
                "bsn_engine_adaptable_components",
                "Reliability terms in the current formula",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.ticks_total.clone()))?;
        registry.register(Box::new(self.ticks_aborted_total.clone()))?;
        registry.register(Box::new(self.plans_total.clone()))?;
        registry.register(Box::new(self.plans_converged_total.clone()))?;
        registry.register(Box::new(self.plans_failed_total.clone()))?;
        registry.register(Box::new(self.exceptions_applied_total.clone()))?;
        registry.register(Box::new(self.exceptions_rejected_total.clone()))?;
        registry.register(Box::new(self.formula_reloads_total.clone()))?;
        registry.register(Box::new(self.qos.clone()))?;
        registry.register(Box::new(self.qos_error.clone()))?;
        registry.register(Box::new(self.adaptable_components.clone()))?;
        Ok(())
    }
}

/// Render every family in `registry` in the Prometheus text format
pub fn export_metrics(registry: &Registry) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
