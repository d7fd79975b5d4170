use super::{
    flight_state::{FlightMode, FlightState, FlightStateStore},
    navigation::NavCommand,
    safety_monitor::SafetyVerdict,
};
use crate::mode_control::{MissionMode, MissionStateMachine, ThreatLevel};
use crate::scheduling::PeriodicTask;
use crate::{log, warn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{broadcast, watch};

/// One timestamped observation of the whole controller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub state: FlightState,
    pub verdict: SafetyVerdict,
    pub threat_level: ThreatLevel,
    pub mission_mode: MissionMode,
    pub flight_mode: FlightMode,
    pub nav: NavCommand,
    /// Identifier of the engaged protection target, if any.
    pub target_id: Option<String>,
}

/// Consumer of telemetry records. The record format beyond this struct is the sink's business.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, record: &TelemetryRecord);
}

/// Prints every n-th record as a single console line.
#[derive(Debug)]
pub struct LogSink {
    every: u64,
    count: AtomicU64,
}

impl LogSink {
    pub fn new(every: u64) -> Self { Self { every: every.max(1), count: AtomicU64::new(0) } }
}

#[async_trait]
impl TelemetrySink for LogSink {
    async fn emit(&self, record: &TelemetryRecord) {
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        if n % self.every != 0 {
            return;
        }
        let state = &record.state;
        log!(
            "TLM {} {:.1}m/s | {} / {} | threat {} | armed {} | batt {:.1}% ({:.2}V) | sats {} | nav {} | crit {} degr {}",
            state.position(),
            state.velocity().ground_speed(),
            record.mission_mode,
            record.flight_mode,
            record.threat_level,
            state.armed(),
            state.battery_pct(),
            state.battery_voltage(),
            state.satellites(),
            record.nav.action,
            record.verdict.critical_failure,
            record.verdict.degraded_performance
        );
    }
}

/// Publishes records to any number of subscribers. Slow subscribers lag and lose records.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<TelemetryRecord>,
}

impl ChannelSink {
    pub fn new(tx: broadcast::Sender<TelemetryRecord>) -> Self { Self { tx } }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> { self.tx.subscribe() }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn emit(&self, record: &TelemetryRecord) {
        // no subscribers is fine
        let _ = self.tx.send(record.clone());
    }
}

/// Slowest loop: snapshots the controller and hands the record to every sink.
pub struct TelemetryTask {
    store: Arc<FlightStateStore>,
    mission: Arc<MissionStateMachine>,
    verdict: watch::Receiver<SafetyVerdict>,
    nav: watch::Receiver<NavCommand>,
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl TelemetryTask {
    pub fn new(
        store: Arc<FlightStateStore>,
        mission: Arc<MissionStateMachine>,
        verdict: watch::Receiver<SafetyVerdict>,
        nav: watch::Receiver<NavCommand>,
        sinks: Vec<Box<dyn TelemetrySink>>,
    ) -> Self {
        if sinks.is_empty() {
            warn!("Telemetry started without sinks.");
        }
        Self { store, mission, verdict, nav, sinks }
    }

    pub async fn snapshot(&self) -> TelemetryRecord {
        let state = self.store.read().await;
        let target_id = self.mission.target().await.map(|t| t.id().to_string());
        let verdict = *self.verdict.borrow();
        let nav = *self.nav.borrow();
        TelemetryRecord {
            timestamp: Utc::now(),
            threat_level: state.threat_level(),
            mission_mode: state.mission_mode(),
            flight_mode: state.flight_mode(),
            verdict,
            nav,
            target_id,
            state,
        }
    }
}

#[async_trait]
impl PeriodicTask for TelemetryTask {
    fn name(&self) -> &'static str { "telemetry" }

    async fn tick(&mut self) {
        let record = self.snapshot().await;
        for sink in &self.sinks {
            sink.emit(&record).await;
        }
    }
}
