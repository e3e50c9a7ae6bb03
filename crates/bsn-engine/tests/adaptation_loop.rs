//! End-to-end tests of the adaptation loop over in-memory adapters

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use bsn_common::{BsnError, PlanError, RepositoryError};
use bsn_engine::{
    transport::{
        exception_channel, ChannelActuator, ExceptionMessage, InMemoryRepository, Repository,
        StrategyCommand,
    },
    AdaptationEngine, EngineConfig, EnginePhase, TickOutcome,
};

const FORMULA: &str = "CTX_G3_T1*F_G3_T1*R_G3_T1*CTX_G4_T1*F_G4_T1*R_G4_T1";
const FORMULA_QUERY: &str = "reliability_formula";
const RELIABILITY_QUERY: &str = "all:reliability:0";
const EVENT_QUERY: &str = "all:event:1";

struct Harness {
    repo: Arc<InMemoryRepository>,
    engine: Arc<AdaptationEngine>,
    commands: mpsc::Receiver<StrategyCommand>,
}

fn harness(config: EngineConfig) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let (actuator, commands) = ChannelActuator::new(16);
    let engine = Arc::new(AdaptationEngine::new(config, repo.clone(), Arc::new(actuator)).unwrap());
    Harness {
        repo,
        engine,
        commands,
    }
}

async fn loaded(config: EngineConfig, reliability: &str, events: &str) -> Harness {
    let h = harness(config);
    h.repo.set(FORMULA_QUERY, FORMULA);
    h.repo.set(RELIABILITY_QUERY, reliability);
    h.repo.set(EVENT_QUERY, events);
    assert!(h.engine.reload_formula().await.unwrap());
    h
}

fn parse_content(content: &str) -> Vec<(String, f64)> {
    content
        .split(';')
        .flat_map(|group| group.split(','))
        .map(|entry| {
            let (path, value) = entry.split_once(':').unwrap();
            (path.to_string(), value.parse().unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_reliability_drop_is_planned_back_into_band() {
    let mut h = loaded(
        EngineConfig::default(),
        "/g3t1:0.9,0.5;/g4t1:1.0",
        "/g3t1:activate;/g4t1:activate",
    )
    .await;
    assert_eq!(h.engine.handle_exception(&ExceptionMessage::new("/g3t1=20")).unwrap(), 70);

    let outcome = h.engine.tick().await.unwrap();
    let TickOutcome::Adapted { qos, content } = outcome else {
        panic!("expected adaptation, got {outcome:?}");
    };
    assert!(qos > 0.882 && qos < 0.918, "qos {qos}");

    let command = h.commands.recv().await.unwrap();
    assert_eq!(command.target, "/enactor");
    assert_eq!(command.source, "/engine");
    assert_eq!(command.content, content);

    let entries = parse_content(&command.content);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "/g3t1");
    assert_eq!(entries[1].0, "/g4t1");
    assert!(entries[0].1 > entries[1].1);
    assert!((entries[0].1 * entries[1].1 - qos).abs() < 1e-5);

    let store = h.engine.snapshot();
    assert!((store.value("R_G3_T1").unwrap() - entries[0].1).abs() < 1e-6);
    assert_eq!(h.engine.phase(), EnginePhase::Monitoring);
    assert_eq!(h.engine.metrics().plans_converged_total.get(), 1);
}

#[tokio::test]
async fn test_stable_qos_publishes_nothing() {
    let mut h = loaded(
        EngineConfig::default(),
        "/g3t1:0.95;/g4t1:0.95",
        "/g3t1:activate;/g4t1:activate",
    )
    .await;

    match h.engine.tick().await.unwrap() {
        TickOutcome::Stable { qos, error } => {
            assert!((qos - 0.9025).abs() < 1e-9);
            assert!((error + 0.0025).abs() < 1e-9);
        }
        other => panic!("expected stable, got {other:?}"),
    }
    assert!(h.commands.try_recv().is_err());
}

#[tokio::test]
async fn test_empty_reliability_response_leaves_strategy_untouched() {
    let h = loaded(
        EngineConfig::default(),
        "/g3t1:0.95;/g4t1:0.95",
        "/g3t1:activate;/g4t1:activate",
    )
    .await;
    h.engine.tick().await.unwrap();
    let before = h.engine.snapshot();

    h.repo.set(RELIABILITY_QUERY, "");
    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BsnError::Repository(RepositoryError::EmptyResponse(_))));
    assert_eq!(h.engine.snapshot(), before);
    assert_eq!(h.engine.metrics().ticks_aborted_total.get(), 1);
}

#[tokio::test]
async fn test_unavailable_event_query_aborts_tick() {
    let h = loaded(
        EngineConfig::default(),
        "/g3t1:0.95;/g4t1:0.95",
        "/g3t1:activate;/g4t1:activate",
    )
    .await;
    let before = h.engine.snapshot();

    h.repo.set(RELIABILITY_QUERY, "/g3t1:0.1;/g4t1:0.1");
    h.repo.remove(EVENT_QUERY);
    assert!(matches!(
        h.engine.tick().await,
        Err(BsnError::Repository(RepositoryError::Unavailable { .. }))
    ));
    assert_eq!(h.engine.snapshot(), before);
}

#[tokio::test]
async fn test_deactivate_event_overrides_measurement() {
    let h = loaded(
        EngineConfig::default(),
        "/g3t1:0.3;/g4t1:0.95",
        "/g3t1:deactivate;/g4t1:activate",
    )
    .await;

    h.engine.tick().await.unwrap();
    let store = h.engine.snapshot();
    assert_eq!(store.value("R_G3_T1"), Some(1.0));
    assert!(store.is_deactivated("R_G3_T1"));
    assert_eq!(store.value("CTX_G3_T1"), Some(1.0));
}

#[tokio::test]
async fn test_non_convergence_keeps_monitored_strategy() {
    let mut h = harness(EngineConfig::default());
    h.repo.set(FORMULA_QUERY, "0.5*CTX_G3_T1*F_G3_T1*R_G3_T1");
    h.repo.set(RELIABILITY_QUERY, "/g3t1:0.5");
    h.repo.set(EVENT_QUERY, "/g3t1:activate");
    h.engine.reload_formula().await.unwrap();

    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BsnError::Plan(PlanError::DidNotConverge { .. })));
    assert_eq!(h.engine.snapshot().value("R_G3_T1"), Some(0.5));
    assert!(h.commands.try_recv().is_err());
    assert_eq!(h.engine.metrics().plans_failed_total.get(), 1);
}

#[tokio::test]
async fn test_actuation_period_defers_planning() {
    let config = EngineConfig {
        actuation_freq: 0.5,
        ..EngineConfig::default()
    };
    let mut h = loaded(config, "/g3t1:0.5;/g4t1:1.0", "/g3t1:activate;/g4t1:activate").await;

    assert!(matches!(h.engine.tick().await.unwrap(), TickOutcome::Deferred { .. }));
    assert!(h.commands.try_recv().is_err());

    assert!(matches!(h.engine.tick().await.unwrap(), TickOutcome::Adapted { .. }));
    assert!(h.commands.recv().await.is_some());

    assert!(matches!(h.engine.tick().await.unwrap(), TickOutcome::Deferred { .. }));
}

#[tokio::test]
async fn test_exceptions_stream_updates_priorities() {
    let h = loaded(EngineConfig::default(), "/g3t1:1;/g4t1:1", "/g4t1:activate").await;
    let (tx, stream) = exception_channel(8);
    let consumer = h.engine.clone().spawn_exception_consumer(stream);

    for content in ["/g4t1=30", "/g4t1=30", "/g9t9=5", "garbage", "/g3t1=-80"] {
        tx.send(ExceptionMessage::new(content)).await.unwrap();
    }
    drop(tx);
    consumer.await.unwrap();

    let store = h.engine.snapshot();
    assert_eq!(store.priority_of("R_G4_T1"), Some(100));
    assert_eq!(store.priority_of("R_G3_T1"), Some(0));
    assert_eq!(h.engine.metrics().exceptions_applied_total.get(), 3);
    assert_eq!(h.engine.metrics().exceptions_rejected_total.get(), 2);
}

/// Repository whose reliability answers arrive too late
struct SlowRepository {
    inner: InMemoryRepository,
    delay: Duration,
}

#[async_trait]
impl Repository for SlowRepository {
    async fn query(&self, source: &str, query: &str) -> Result<String, RepositoryError> {
        if query.starts_with("all:reliability") {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.query(source, query).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout_aborts_tick() {
    let inner = InMemoryRepository::new();
    inner.set(FORMULA_QUERY, FORMULA);
    inner.set(RELIABILITY_QUERY, "/g3t1:0.5;/g4t1:1.0");
    inner.set(EVENT_QUERY, "/g3t1:activate;/g4t1:activate");
    let repo = Arc::new(SlowRepository {
        inner,
        delay: Duration::from_secs(10),
    });

    let config = EngineConfig {
        query_timeout_ms: 100,
        ..EngineConfig::default()
    };
    let (actuator, _commands) = ChannelActuator::new(4);
    let engine = AdaptationEngine::new(config, repo, Arc::new(actuator)).unwrap();
    engine.reload_formula().await.unwrap();
    let before = engine.snapshot();

    assert!(matches!(
        engine.tick().await,
        Err(BsnError::Repository(RepositoryError::Timeout { elapsed_ms: 100, .. }))
    ));
    assert_eq!(engine.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn test_run_polls_for_formula_then_adapts() {
    let mut h = harness(EngineConfig::default());
    h.repo.set(RELIABILITY_QUERY, "/g3t1:0.5;/g4t1:1.0");
    h.repo.set(EVENT_QUERY, "/g3t1:activate;/g4t1:activate");

    let (stop, stopped) = oneshot::channel::<()>();
    let run = tokio::spawn(h.engine.clone().run(async {
        let _ = stopped.await;
    }));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.engine.phase(), EnginePhase::Idle);
    assert!(h.commands.try_recv().is_err());

    h.repo.set(FORMULA_QUERY, FORMULA);
    let command = h.commands.recv().await.unwrap();
    assert!(command.content.starts_with("/g3t1:"));
    assert_eq!(h.engine.formula_text().as_deref(), Some(FORMULA));

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_reloads_changed_formula() {
    let config = EngineConfig {
        reload_ticks: Some(2),
        ..EngineConfig::default()
    };
    let mut h = loaded(config, "/g3t1:0.5;/g4t1:1.0", "/g3t1:activate;/g4t1:activate").await;

    let (stop, stopped) = oneshot::channel::<()>();
    let run = tokio::spawn(h.engine.clone().run(async {
        let _ = stopped.await;
    }));
    h.commands.recv().await.unwrap();

    h.repo.set(FORMULA_QUERY, "CTX_G3_T1*F_G3_T1*R_G3_T1");
    let command = loop {
        let command = h.commands.recv().await.unwrap();
        if !command.content.contains("/g4t1") {
            break command;
        }
    };
    assert!(command.content.starts_with("/g3t1:"));
    assert_eq!(h.engine.metrics().formula_reloads_total.get(), 2);

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
}
