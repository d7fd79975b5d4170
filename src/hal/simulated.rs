use super::hal_common::{FlightHal, HardwareError, SensorSnapshot};
use crate::event;
use crate::flight_control::common::{
    Position, Velocity,
    geo::{bearing, destination_point, haversine_distance},
};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};

/// Initial conditions and behavior of the simulated aircraft.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub start: Position,
    pub battery_pct: f64,
    /// Battery percentage lost per sensor read.
    pub battery_drain_per_read: f64,
    pub satellites: u8,
    /// Random horizontal jitter in meters added to each reported fix.
    pub gps_noise_m: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start: Position::new(40.7128, -74.0060, 0.0),
            battery_pct: 100.0,
            battery_drain_per_read: 0.0005,
            satellites: 10,
            gps_noise_m: 0.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    position: Position,
    velocity: Velocity,
    command: Option<(Position, f64)>,
    battery_pct: f64,
    gps_lock: bool,
    satellites: u8,
    armed: bool,
    last_step: Instant,
    failing_commands: u32,
    failing_reads: u32,
    /// Latency of the next arm call, the link stays usable meanwhile.
    arm_stall: Duration,
    arm_calls: u32,
    disarm_calls: u32,
    commands_sent: u64,
}

impl SimState {
    /// Moves the point mass toward the last commanded target at the commanded speed.
    fn step(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        let Some((target, speed)) = self.command else {
            self.velocity = Velocity::default();
            return;
        };
        if !self.armed || dt <= 0.0 {
            return;
        }
        let d_h = haversine_distance(&self.position, &target);
        let d_v = target.alt() - self.position.alt();
        let dist = d_h.hypot(d_v);
        let reach = speed * dt;
        if dist <= reach || dist < 1e-6 {
            self.position = target.at_alt(target.alt().max(0.0)).with_timestamp(Utc::now());
            self.velocity = Velocity::default();
            return;
        }
        let frac = reach / dist;
        let brg = bearing(&self.position, &target);
        let next = destination_point(&self.position, brg, d_h * frac);
        let alt = (self.position.alt() + d_v * frac).max(0.0);
        self.position = next.at_alt(alt).with_heading(brg).with_timestamp(Utc::now());
        let h_speed = speed * d_h / dist;
        self.velocity = Velocity::linear(
            h_speed * brg.to_radians().cos(),
            h_speed * brg.to_radians().sin(),
            speed * d_v / dist,
        );
    }
}

/// Kinematic point-mass stand-in for the flight controller, driven by tokio's clock.
#[derive(Debug)]
pub struct SimulatedHal {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimulatedHal {
    /// Nominal voltage of a full 6S pack.
    const V_FULL: f64 = 25.2;
    /// Voltage of an empty 6S pack.
    const V_EMPTY: f64 = 19.8;

    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                position: config.start,
                velocity: Velocity::default(),
                command: None,
                battery_pct: config.battery_pct,
                gps_lock: true,
                satellites: config.satellites,
                armed: false,
                last_step: Instant::now(),
                failing_commands: 0,
                failing_reads: 0,
                arm_stall: Duration::ZERO,
                arm_calls: 0,
                disarm_calls: 0,
                commands_sent: 0,
            }),
        }
    }

    /// Makes the next `n` position commands fail with [`HardwareError::LinkDown`].
    pub async fn fail_next_commands(&self, n: u32) { self.state.lock().await.failing_commands = n; }

    /// Makes the next `n` sensor reads fail with [`HardwareError::LinkDown`].
    pub async fn fail_next_reads(&self, n: u32) { self.state.lock().await.failing_reads = n; }

    /// Delays the next arm call by `stall` without blocking other calls.
    pub async fn stall_next_arm(&self, stall: Duration) { self.state.lock().await.arm_stall = stall; }

    pub async fn set_gps(&self, lock: bool, satellites: u8) {
        let mut state = self.state.lock().await;
        state.gps_lock = lock;
        state.satellites = satellites;
    }

    pub async fn set_battery(&self, pct: f64) { self.state.lock().await.battery_pct = pct; }

    pub async fn set_position(&self, position: Position) {
        let mut state = self.state.lock().await;
        state.position = position;
        state.command = None;
    }

    pub async fn last_command(&self) -> Option<(Position, f64)> { self.state.lock().await.command }
    pub async fn commands_sent(&self) -> u64 { self.state.lock().await.commands_sent }
    pub async fn arm_calls(&self) -> u32 { self.state.lock().await.arm_calls }
    pub async fn disarm_calls(&self) -> u32 { self.state.lock().await.disarm_calls }
    pub async fn is_armed(&self) -> bool { self.state.lock().await.armed }

    fn voltage_for(pct: f64) -> f64 { Self::V_EMPTY + (Self::V_FULL - Self::V_EMPTY) * pct / 100.0 }
}

#[async_trait]
impl FlightHal for SimulatedHal {
    fn backend_name(&self) -> &'static str { "simulated" }

    async fn send_position_command(&self, target: Position, speed: f64) -> Result<(), HardwareError> {
        let mut state = self.state.lock().await;
        state.step(Instant::now());
        if state.failing_commands > 0 {
            state.failing_commands -= 1;
            return Err(HardwareError::LinkDown);
        }
        if !state.armed {
            return Err(HardwareError::NotArmed);
        }
        event!("SIM command to {target} at {speed:.1}m/s");
        state.command = Some((target, speed.max(0.0)));
        state.commands_sent += 1;
        Ok(())
    }

    async fn read_sensors(&self) -> Result<SensorSnapshot, HardwareError> {
        let mut state = self.state.lock().await;
        state.step(Instant::now());
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(HardwareError::LinkDown);
        }
        state.battery_pct = (state.battery_pct - self.config.battery_drain_per_read).max(0.0);
        let position = if self.config.gps_noise_m > 0.0 {
            let mut rng = rand::rng();
            let jitter = rng.random_range(0.0..self.config.gps_noise_m);
            let dir = rng.random_range(0.0..360.0);
            destination_point(&state.position, dir, jitter)
        } else {
            state.position
        };
        Ok(SensorSnapshot {
            position,
            velocity: state.velocity,
            battery_voltage: Self::voltage_for(state.battery_pct),
            battery_pct: state.battery_pct,
            gps_lock: state.gps_lock,
            satellites: state.satellites,
        })
    }

    async fn arm(&self) -> Result<(), HardwareError> {
        let stall = std::mem::take(&mut self.state.lock().await.arm_stall);
        if !stall.is_zero() {
            sleep(stall).await;
        }
        let mut state = self.state.lock().await;
        state.step(Instant::now());
        state.armed = true;
        state.arm_calls += 1;
        Ok(())
    }

    async fn disarm(&self) -> Result<(), HardwareError> {
        let mut state = self.state.lock().await;
        state.step(Instant::now());
        state.armed = false;
        state.command = None;
        state.velocity = Velocity::default();
        state.disarm_calls += 1;
        Ok(())
    }
}
