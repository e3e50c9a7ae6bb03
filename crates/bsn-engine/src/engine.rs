//! Adaptation engine - the MAPE control loop
//!
//! Each tick fetches repository data outside the lock, then runs
//! Monitor-apply, Analyze, Plan and Execute-serialize inside one critical
//! section, and finally publishes outside the lock. Exception updates take
//! the same lock, so they land strictly between ticks.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use bsn_common::{BsnError, RepositoryError, Result, TermKind};
use bsn_model::{Formula, GoalTree};

use crate::config::EngineConfig;
use crate::exception::PriorityAdjustment;
use crate::execute::{strategy_content, unaddressable_terms, ENACTOR_TARGET};
use crate::monitor::{Observations, EVENT_QUERY};
use crate::planner::{self, Plan, PlanParams};
use crate::state::{EnginePhase, EngineState, StrategyStore};
use crate::telemetry::EngineMetrics;
use crate::transport::{Actuator, ExceptionMessage, ExceptionStream, Repository, StrategyCommand};

/// Result of one control-loop tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No formula loaded yet
    Idle,
    /// QoS within the stability margin
    Stable { qos: f64, error: f64 },
    /// QoS out of band, but the actuation period has not elapsed
    Deferred { qos: f64, error: f64 },
    /// A new strategy was planned and published
    Adapted { qos: f64, content: String },
}

struct Analysis {
    qos: f64,
    error: f64,
    plan: bool,
}

/// Reliability adaptation engine
pub struct AdaptationEngine {
    config: RwLock<EngineConfig>,
    state: Mutex<EngineState>,
    repository: Arc<dyn Repository>,
    actuator: Arc<dyn Actuator>,
    metrics: EngineMetrics,
    goal_model: Option<GoalTree>,
}

impl AdaptationEngine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        actuator: Arc<dyn Actuator>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = EngineMetrics::new().map_err(|e| BsnError::Internal(e.to_string()))?;

        Ok(Self {
            config: RwLock::new(config),
            state: Mutex::new(EngineState::default()),
            repository,
            actuator,
            metrics,
            goal_model: None,
        })
    }

    /// Cross-check installed formulas against a goal model
    pub fn with_goal_model(mut self, tree: GoalTree) -> Self {
        self.goal_model = Some(tree);
        self
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase
    }

    /// Copy of the current strategy, priorities and deactivation set
    pub fn snapshot(&self) -> StrategyStore {
        self.state.lock().store.clone()
    }

    pub fn formula_text(&self) -> Option<String> {
        self.state.lock().formula.as_ref().map(|f| f.text().to_string())
    }

    // ============ Parameters ============

    pub fn setpoint(&self) -> f64 {
        self.config.read().setpoint
    }

    pub fn set_setpoint(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.setpoint = value)
    }

    pub fn offset(&self) -> f64 {
        self.config.read().offset
    }

    pub fn set_offset(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.offset = value)
    }

    pub fn gain(&self) -> f64 {
        self.config.read().gain
    }

    pub fn set_gain(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.gain = value)
    }

    pub fn info_quant(&self) -> u32 {
        self.config.read().info_quant
    }

    pub fn set_info_quant(&self, value: u32) -> Result<()> {
        self.update_config(|c| c.info_quant = value)
    }

    pub fn monitor_freq(&self) -> f64 {
        self.config.read().monitor_freq
    }

    /// Takes effect for the cycle counter at once and for the tick period on the next `run`
    pub fn set_monitor_freq(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.monitor_freq = value)
    }

    pub fn actuation_freq(&self) -> f64 {
        self.config.read().actuation_freq
    }

    pub fn set_actuation_freq(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.actuation_freq = value)
    }

    pub fn stability_margin(&self) -> f64 {
        self.config.read().stability_margin
    }

    pub fn set_stability_margin(&self, value: f64) -> Result<()> {
        self.update_config(|c| c.stability_margin = value)
    }

    fn update_config(&self, change: impl FnOnce(&mut EngineConfig)) -> Result<()> {
        let mut cfg = self.config();
        change(&mut cfg);
        cfg.validate()?;
        *self.config.write() = cfg;
        Ok(())
    }

    // ============ Repository ============

    async fn fetch(&self, cfg: &EngineConfig, query: &str) -> std::result::Result<String, RepositoryError> {
        match tokio::time::timeout(cfg.query_timeout(), self.repository.query(&cfg.source, query)).await {
            Ok(answer) => answer,
            Err(_) => Err(RepositoryError::Timeout {
                query: query.to_string(),
                elapsed_ms: cfg.query_timeout_ms,
            }),
        }
    }

    async fn observe(&self, cfg: &EngineConfig) -> std::result::Result<Observations, RepositoryError> {
        let reliability_query = cfg.reliability_query();
        let (reliability, events) = futures::try_join!(
            self.fetch(cfg, &reliability_query),
            self.fetch(cfg, EVENT_QUERY)
        )?;
        Observations::parse(&reliability_query, &reliability, EVENT_QUERY, &events)
    }

    // ============ Formula ============

    /// Fetch and install the formula; `Ok(false)` when the text is unchanged
    ///
    /// On any error the current formula, strategy and priorities are kept.
    #[instrument(skip(self))]
    pub async fn reload_formula(&self) -> Result<bool> {
        let cfg = self.config();
        let query = cfg.formula_query();
        let text = self.fetch(&cfg, &query).await?;
        if text.trim().is_empty() {
            return Err(RepositoryError::EmptyResponse(query).into());
        }

        if self
            .state
            .lock()
            .formula
            .as_ref()
            .is_some_and(|f| f.text() == text)
        {
            debug!("Formula unchanged");
            return Ok(false);
        }

        let formula = Formula::parse(&text)?;
        for term in self.unmapped_terms(&formula) {
            warn!(%term, "Formula term has no leaf task in the goal model");
        }
        for term in unaddressable_terms(&formula) {
            warn!(%term, "Reliability term names no component and will not be actuated");
        }
        let adaptable = formula.terms_of_kind(TermKind::Reliability).count();
        let terms = formula.descriptors().len();

        self.state.lock().install_formula(formula);
        self.metrics.formula_reloads_total.inc();
        self.metrics.adaptable_components.set(adaptable as i64);
        info!(terms, adaptable, "Installed formula");
        Ok(true)
    }

    /// Namespaced terms of `formula` that no leaf task of the goal model contributes
    pub fn unmapped_terms(&self, formula: &Formula) -> Vec<String> {
        let Some(tree) = &self.goal_model else {
            return Vec::new();
        };
        let namespace: HashSet<String> = tree.term_namespace().into_iter().collect();
        formula
            .descriptors()
            .iter()
            .filter(|d| d.kind != TermKind::Other && !namespace.contains(&d.name))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Poll the repository until a formula is installed
    pub async fn wait_for_formula(&self) {
        loop {
            match self.reload_formula().await {
                Ok(_) => return,
                Err(e) => {
                    warn!(error = %e, "Formula not available, engine idle");
                    tokio::time::sleep(self.config().formula_poll()).await;
                }
            }
        }
    }

    // ============ MAPE ============

    /// Run one Monitor → Analyze → Plan → Execute pass
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickOutcome> {
        let cfg = self.config();
        {
            let mut state = self.state.lock();
            if state.formula.is_none() {
                return Ok(TickOutcome::Idle);
            }
            state.phase = EnginePhase::Monitoring;
        }
        self.metrics.ticks_total.inc();

        let observations = self.observe(&cfg).await.map_err(|e| {
            self.metrics.ticks_aborted_total.inc();
            BsnError::from(e)
        })?;

        let (outcome, command) = {
            let mut guard = self.state.lock();
            let result = self.adapt(&mut guard, &cfg, &observations);
            guard.phase = EnginePhase::Monitoring;
            result?
        };

        if let Some(command) = command {
            self.actuator.publish(command).await?;
        }
        Ok(outcome)
    }

    fn adapt(
        &self,
        state: &mut EngineState,
        cfg: &EngineConfig,
        observations: &Observations,
    ) -> Result<(TickOutcome, Option<StrategyCommand>)> {
        let Some(formula) = state.formula.as_ref() else {
            return Ok((TickOutcome::Idle, None));
        };
        observations.apply(formula, &mut state.store);
        state.cycles += 1;

        let analysis = analyze(state, cfg).map_err(|e| {
            self.metrics.ticks_aborted_total.inc();
            e
        })?;
        self.metrics.qos.set(analysis.qos);
        self.metrics.qos_error.set(analysis.error);

        if !analysis.plan {
            let outcome = if analysis.error.abs() > cfg.stability_margin * cfg.setpoint {
                TickOutcome::Deferred {
                    qos: analysis.qos,
                    error: analysis.error,
                }
            } else {
                TickOutcome::Stable {
                    qos: analysis.qos,
                    error: analysis.error,
                }
            };
            return Ok((outcome, None));
        }

        self.metrics.plans_total.inc();
        let plan = match plan(state, cfg) {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.plans_failed_total.inc();
                warn!(error = %e, qos = analysis.qos, "Plan did not produce a strategy");
                return Err(e);
            }
        };
        self.metrics.plans_converged_total.inc();
        info!(pivot = %plan.pivot, qos = plan.qos, "Plan converged");

        let qos = plan.qos;
        state.store.commit(plan.strategy);
        let command = execute(state, cfg);
        Ok((
            TickOutcome::Adapted {
                qos,
                content: command.content.clone(),
            },
            Some(command),
        ))
    }

    // ============ Exceptions ============

    /// Apply one exception, returning the new priority
    pub fn handle_exception(&self, message: &ExceptionMessage) -> Result<i32> {
        let result = PriorityAdjustment::parse(&message.content).and_then(|adjustment| {
            let priority = adjustment.apply(&mut self.state.lock().store)?;
            Ok((adjustment, priority))
        });

        match result {
            Ok((adjustment, priority)) => {
                self.metrics.exceptions_applied_total.inc();
                let task = self.goal_model.as_ref().map(|tree| {
                    tree.find_by_component(&adjustment.component.path())
                        .map(|node| node.description().to_string())
                });
                match task {
                    Some(Err(e)) => warn!(
                        component = %adjustment.component,
                        error = %e,
                        "Exception names a component outside the goal model"
                    ),
                    Some(Ok(task)) => debug!(%task, "Exception maps to goal model task"),
                    None => {}
                }
                debug!(
                    component = %adjustment.component,
                    delta = adjustment.delta,
                    priority,
                    "Priority adjusted"
                );
                Ok(priority)
            }
            Err(e) => {
                self.metrics.exceptions_rejected_total.inc();
                warn!(error = %e, content = %message.content, "Exception rejected");
                Err(e.into())
            }
        }
    }

    /// Consume exceptions until the stream ends
    pub fn spawn_exception_consumer(self: Arc<Self>, mut exceptions: ExceptionStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = exceptions.next().await {
                // rejected exceptions are logged and counted by the handler
                let _ = self.handle_exception(&message);
            }
            debug!("Exception stream closed");
        })
    }

    // ============ Run loop ============

    /// Wait for a formula, then tick until `shutdown` resolves
    ///
    /// Tick period and reload interval are read from the configuration once.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested before a formula was available");
                return Ok(());
            }
            _ = self.wait_for_formula() => {}
        }

        let cfg = self.config();
        let reload_every = cfg.reload_interval();
        let mut interval = tokio::time::interval(cfg.tick_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = cfg.tick_period().as_millis() as u64, reload_every, "Adaptation loop started");

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(ticks, "Adaptation loop stopped");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            ticks += 1;
            if ticks % reload_every == 0 {
                if let Err(e) = self.reload_formula().await {
                    warn!(error = %e, "Formula reload failed, keeping current formula");
                }
            }

            match self.tick().await {
                Ok(outcome) => debug!(?outcome, "Tick complete"),
                Err(e) if e.is_tick_scoped() => warn!(error = %e, "Tick abandoned"),
                Err(e) => error!(error = %e, "Tick failed on engine state, continuing"),
            }
        }
    }
}

fn analyze(state: &mut EngineState, cfg: &EngineConfig) -> Result<Analysis> {
    state.phase = EnginePhase::Analyzing;
    let formula = state
        .formula
        .as_ref()
        .ok_or_else(|| BsnError::Internal("analyze without formula".to_string()))?;

    let qos = formula.evaluate(state.store.strategy())?;
    let error = cfg.setpoint - qos;
    let out_of_band = error.abs() > cfg.stability_margin * cfg.setpoint;
    let due = state.cycles as f64 >= cfg.cycles_per_plan();

    let plan = out_of_band && due;
    if plan {
        state.cycles = 0;
    }
    debug!(qos, error, out_of_band, due, "Analyzed");
    Ok(Analysis { qos, error, plan })
}

fn plan(state: &mut EngineState, cfg: &EngineConfig) -> Result<Plan> {
    state.phase = EnginePhase::Planning;
    let formula = state
        .formula
        .as_ref()
        .ok_or_else(|| BsnError::Internal("plan without formula".to_string()))?;

    let params = PlanParams {
        setpoint: cfg.setpoint,
        offset: cfg.offset,
        gain: cfg.gain,
        stability_margin: cfg.stability_margin,
    };
    planner::plan(
        formula,
        state.store.strategy(),
        state.store.priority(),
        state.store.deactivated(),
        &params,
    )
}

fn execute(state: &mut EngineState, cfg: &EngineConfig) -> StrategyCommand {
    state.phase = EnginePhase::Executing;
    let content = strategy_content(state.store.strategy());
    debug!(%content, "Executing strategy");
    StrategyCommand {
        source: cfg.source.clone(),
        target: ENACTOR_TARGET.to_string(),
        content,
    }
}
