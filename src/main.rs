#![allow(clippy::similar_names)]
#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
mod config;
mod flight_control;
mod hal;
mod keychain;
mod logger;
mod mode_control;
mod scheduling;

use crate::config::{EscortConfig, HalSelection};
use crate::flight_control::common::{Position, geo::destination_point};
use crate::hal::{
    HalBackend,
    live::LiveHal,
    simulated::{SimConfig, SimulatedHal},
};
use crate::mode_control::{MissionMode, OperatorAlert, ProtectionTarget, ThreatLevel};
use crate::scheduling::{CommandError, Orchestrator};
use std::{fmt::Debug, str::FromStr, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const DEF_TAKEOFF_ALT: f64 = 10.0;
const DEMO_TARGET_OFFSET: f64 = 40.0;
const DEMO_TARGET_RADIUS: f64 = 20.0;

const HELP: &str = "commands: green|yellow|orange|red|omega|0-4, threat <level> <lat> <lon>, \
                    target <id> <lat> <lon> <radius>, goto <lat> <lon> <alt> [speed], demo, clear, \
                    takeoff [alt], land, mode <MISSION_MODE>, status, quit";

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let config = EscortConfig::from_env().unwrap_or_else(|e| fatal!("Unusable configuration: {e}"));
    let hal = match config.hal {
        HalSelection::Simulated => HalBackend::Simulated(SimulatedHal::new(SimConfig::default())),
        HalSelection::Live => {
            let url = config.driver_url.clone().unwrap_or_default();
            let live = LiveHal::connect(&url, config.hw_timeout)
                .unwrap_or_else(|e| fatal!("Driver layer client could not be built: {e}"));
            HalBackend::Live(live)
        }
    };

    let orchestrator = Arc::new(Orchestrator::start(config, hal).await);
    tokio::spawn(print_alerts(orchestrator.subscribe_alerts()));
    info!("{HELP}");

    run_console(&orchestrator).await;

    let report = orchestrator.shutdown().await;
    for stats in &report.tasks {
        info!(
            "{}: {} ticks, {} deadline misses, worst {:?} of {:?}",
            stats.name,
            stats.ticks,
            stats.deadline_misses,
            stats.worst_tick,
            stats.period
        );
    }
    if report.armed {
        error!("Exiting with the aircraft armed in {}!", report.flight_mode);
    }
}

async fn print_alerts(mut rx: broadcast::Receiver<OperatorAlert>) {
    loop {
        match rx.recv().await {
            Ok(OperatorAlert::LandingFailed(reason)) => {
                error!("OPERATOR ALERT: emergency landing failed ({reason}), take manual control!");
            }
            Ok(alert) => warn!("OPERATOR ALERT: {alert}"),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("{n} operator alerts dropped."),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_console(orch: &Orchestrator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => (),
            ["q" | "quit" | "exit"] => break,
            ["help"] => info!("{HELP}"),
            ["status"] => print_status(orch).await,
            ["takeoff"] => report("takeoff", orch.arm_and_takeoff(DEF_TAKEOFF_ALT).await),
            ["takeoff", alt] => match alt.parse::<f64>() {
                Ok(alt_m) => report("takeoff", orch.arm_and_takeoff(alt_m).await),
                Err(_) => warn!("Unparsable altitude: {alt}"),
            },
            ["land"] => report("land", orch.emergency_land().await),
            ["demo"] => {
                let home = *orch.state().await.position();
                let spot = destination_point(&home, 0.0, DEMO_TARGET_OFFSET).at_alt(0.0);
                let target = ProtectionTarget::new("principal", spot, DEMO_TARGET_RADIUS, false);
                report("target", orch.set_protection_target(target).await);
            }
            ["clear"] => {
                let here = *orch.state().await.position();
                report("clear", orch.set_protection_target(ProtectionTarget::cleared(here)).await);
            }
            ["target", id, lat, lon, radius] => match (lat.parse::<f64>(), lon.parse::<f64>(), radius.parse::<f64>()) {
                (Ok(lat_deg), Ok(lon_deg), Ok(radius_m)) => {
                    let target = ProtectionTarget::new(*id, Position::new(lat_deg, lon_deg, 0.0), radius_m, true);
                    report("target", orch.set_protection_target(target).await);
                }
                _ => warn!("Usage: target <id> <lat> <lon> <radius>"),
            },
            ["threat", level, lat, lon] => match (parse_level(level), lat.parse::<f64>(), lon.parse::<f64>()) {
                (Some(lvl), Ok(lat_deg), Ok(lon_deg)) => {
                    let location = Position::new(lat_deg, lon_deg, 0.0);
                    report("threat", orch.report_threat(lvl, location).await);
                }
                _ => warn!("Usage: threat <level> <lat> <lon>"),
            },
            ["goto", lat, lon, alt, rest @ ..] if rest.len() <= 1 => {
                let speed = rest.first().map(|raw| raw.parse::<f64>());
                match (lat.parse::<f64>(), lon.parse::<f64>(), alt.parse::<f64>(), speed.transpose()) {
                    (Ok(lat_deg), Ok(lon_deg), Ok(alt_m), Ok(speed_ms)) => {
                        let goal = Position::new(lat_deg, lon_deg, alt_m);
                        report("goto", orch.navigate_to(goal, speed_ms).await);
                    }
                    _ => warn!("Usage: goto <lat> <lon> <alt> [speed]"),
                }
            }
            ["mode", mode] => match MissionMode::from_str(mode) {
                Ok(m) => report("mode", orch.override_mission_mode(m).await),
                Err(_) => warn!("Unknown mission mode: {mode}"),
            },
            [level] => match parse_level(level) {
                Some(lvl) => report("threat", orch.update_threat_level(lvl).await),
                None => warn!("Unknown command: {line}"),
            },
            _ => warn!("Unknown command: {line}"),
        }
    }
}

fn parse_level(raw: &str) -> Option<ThreatLevel> {
    raw.parse::<u8>()
        .ok()
        .and_then(ThreatLevel::from_ordinal)
        .or_else(|| ThreatLevel::from_str(raw).ok())
}

fn report<T: Debug>(what: &str, res: Result<T, CommandError>) {
    match res {
        Ok(val) => log!("{what}: {val:?}"),
        Err(e) => warn!("{what} rejected: {e}"),
    }
}

async fn print_status(orch: &Orchestrator) {
    let state = orch.state().await;
    let verdict = orch.verdict();
    let nav = orch.nav_command();
    info!(
        "{} | {} / {} | threat {} | armed {} airborne {} | batt {:.1}% | sats {} | nav {} {:?}",
        state.position(),
        state.mission_mode(),
        state.flight_mode(),
        state.threat_level(),
        state.armed(),
        state.is_airborne(),
        state.battery_pct(),
        state.satellites(),
        nav.action,
        nav.distance_to_target
    );
    log!("verdict: {verdict:?}");
}
