//! Control loop / supervisor
//!
//! Drives the periodic sample-decide-actuate cycle: read the CPU sensor,
//! map the temperature to a target duty, apply asymmetric slew and
//! hysteresis, and push the result to all six fans. Transient wire failures
//! are absorbed by a strike counter with a re-initialization path; too many
//! consecutive failures stop the daemon.

use gridplus_core::{Result, TransferFunction};
use gridplus_hardware::{GridController, SerialDriver, SerialTransport};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::signals::{SignalEvent, Signals, StopSignal};
use crate::thermal::TempSensor;

/// Interval between control ticks
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before attempting to re-initialize the controller
pub const RECOVERY_DELAY: Duration = Duration::from_secs(5);

/// Consecutive failures tolerated before giving up
pub const MAX_STRIKES: u32 = 5;

/// Sentinel for "no duty has been applied yet"
const NEVER_APPLIED: i32 = -1;

/// Band below the applied duty within which a lower target is ignored
const HYSTERESIS_BAND: i32 = 5;

/// Maximum downward duty change per tick
const MAX_STEP_DOWN: i32 = 10;

/// Decide the duty to apply this tick, if any.
///
/// Rises are applied immediately and exactly; falls are ignored inside the
/// hysteresis band and otherwise decay by at most [`MAX_STEP_DOWN`] points
/// per tick, landing exactly on the target once within reach.
fn next_duty(last_applied: i32, target: i32) -> Option<i32> {
    if target > last_applied {
        Some(target)
    } else if last_applied - target > HYSTERESIS_BAND {
        Some(target.max(last_applied - MAX_STEP_DOWN))
    } else {
        None
    }
}

/// Consecutive-failure accounting for the recovery policy
#[derive(Debug, Default)]
struct Strikes {
    count: u32,
}

impl Strikes {
    fn reset(&mut self) {
        self.count = 0;
    }

    /// Record a failure; true when the limit is reached and the loop must
    /// give up.
    fn record(&mut self) -> bool {
        self.count += 1;
        self.count >= MAX_STRIKES
    }
}

/// The sample-decide-actuate core, generic over the transport for testing
pub struct Supervisor<T: SerialTransport + ?Sized> {
    controller: GridController<T>,
    transfer: TransferFunction,
    last_applied: i32,
    verbose: bool,
    verbose_toggle_pending: bool,
}

impl<T: SerialTransport + ?Sized> Supervisor<T> {
    pub fn new(controller: GridController<T>, transfer: TransferFunction) -> Self {
        Self {
            controller,
            transfer,
            last_applied: NEVER_APPLIED,
            verbose: false,
            verbose_toggle_pending: false,
        }
    }

    /// Duty most recently applied to the fans, if any
    pub fn last_applied(&self) -> Option<u8> {
        u8::try_from(self.last_applied).ok()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Request a verbose toggle; it takes effect at the next tick.
    pub fn queue_verbose_toggle(&mut self) {
        self.verbose_toggle_pending = true;
    }

    /// Swap in a freshly opened controller after a recovery.
    ///
    /// The applied-duty state is forgotten so the next tick re-actuates the
    /// hardware, which may have been power-cycled since the last command.
    pub fn replace_controller(&mut self, controller: GridController<T>) {
        self.controller = controller;
        self.last_applied = NEVER_APPLIED;
    }

    /// Run one control tick against a sampled temperature.
    pub async fn tick(&mut self, temp_c: f64) -> Result<()> {
        let target = i32::from(self.transfer.duty_for(temp_c));

        if self.verbose_toggle_pending {
            self.verbose_toggle_pending = false;
            self.verbose = !self.verbose;
            info!(
                "verbose mode {}",
                if self.verbose { "activated" } else { "deactivated" }
            );
            if self.verbose {
                info!("current temperature is {:.2} degrees", temp_c);
                info!("current speed is {}%", target);
            }
        }

        if let Some(duty) = next_duty(self.last_applied, target) {
            self.last_applied = duty;
            if self.verbose {
                info!("setting fans speed to {}%", duty);
            }
            for fan in self.controller.fans() {
                fan.set_percent(duty as u8).await?;
            }
        }

        Ok(())
    }
}

/// The long-running daemon loop: supervisor plus sensor, signals, and the
/// recovery policy
pub struct Daemon {
    supervisor: Supervisor<SerialDriver>,
    sensor: TempSensor,
    device: String,
    signals: Signals,
}

impl Daemon {
    pub fn new(
        supervisor: Supervisor<SerialDriver>,
        sensor: TempSensor,
        device: String,
        signals: Signals,
    ) -> Self {
        Self {
            supervisor,
            sensor,
            device,
            signals,
        }
    }

    /// Run until a stop signal arrives or the failure policy gives up.
    ///
    /// Returns the stop signal when one was received, for the terminal log
    /// line.
    pub async fn run(&mut self) -> Option<StopSignal> {
        let mut strikes = Strikes::default();

        loop {
            match self.cycle().await {
                Ok(()) => {
                    strikes.reset();
                    if let Some(stop) = self.rest(TICK_INTERVAL).await {
                        return Some(stop);
                    }
                }
                Err(e) => {
                    if strikes.record() {
                        error!("{}", e);
                        error!("too many consecutive errors, giving up");
                        return None;
                    }
                    warn!("{}", e);

                    if let Some(stop) = self.rest(RECOVERY_DELAY).await {
                        return Some(stop);
                    }

                    match GridController::open(&self.device).await {
                        Ok(controller) => {
                            info!("fan controller re-initialized");
                            self.supervisor.replace_controller(controller);
                        }
                        Err(e) => {
                            error!("could not re-initialize the fan controller: {}", e);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// One sample-decide-actuate cycle
    async fn cycle(&mut self) -> Result<()> {
        let temp_c = self.sensor.read_celsius().await?;
        self.supervisor.tick(temp_c).await?;
        if let Some(duty) = self.supervisor.last_applied() {
            debug!("temperature {:.2} degrees, fans at {}%", temp_c, duty);
        }
        Ok(())
    }

    /// Interruptible sleep. A stop signal ends it and is returned; a verbose
    /// toggle ends it early with the remainder discarded.
    async fn rest(&mut self, duration: Duration) -> Option<StopSignal> {
        tokio::select! {
            _ = sleep(duration) => None,
            event = self.signals.recv() => match event {
                SignalEvent::Stop(stop) => Some(stop),
                SignalEvent::ToggleVerbose => {
                    debug!(
                        "verbose toggle requested (currently {})",
                        self.supervisor.is_verbose()
                    );
                    self.supervisor.queue_verbose_toggle();
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridplus_core::GridError;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Frames recorded by a mock transport, shared with the test body
    type SharedFrames = Arc<Mutex<Vec<Vec<u8>>>>;

    /// Transport that acknowledges every command and records the frames
    struct AckTransport {
        writes: SharedFrames,
        last_access: Instant,
    }

    impl AckTransport {
        fn new() -> (Self, SharedFrames) {
            let writes = SharedFrames::default();
            let transport = Self {
                writes: Arc::clone(&writes),
                last_access: Instant::now(),
            };
            (transport, writes)
        }
    }

    #[async_trait]
    impl SerialTransport for AckTransport {
        async fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(data.to_vec());
            self.last_access = Instant::now();
            Ok(())
        }

        async fn read_exact(&mut self, buf: &mut [u8], _read_timeout: Duration) -> Result<()> {
            buf.fill(0x01);
            self.last_access = Instant::now();
            Ok(())
        }

        fn last_access(&self) -> Instant {
            self.last_access
        }
    }

    /// Transport whose writes always fail, to drive the error path
    struct DeadTransport;

    #[async_trait]
    impl SerialTransport for DeadTransport {
        async fn write_all(&mut self, _data: &[u8]) -> Result<()> {
            Err(GridError::Serial("wire is down".to_string()))
        }

        async fn read_exact(&mut self, _buf: &mut [u8], _read_timeout: Duration) -> Result<()> {
            Err(GridError::Serial("wire is down".to_string()))
        }

        fn last_access(&self) -> Instant {
            Instant::now()
        }
    }

    fn linear_0_100() -> TransferFunction {
        TransferFunction::Linear {
            min_temp: 25.0,
            max_temp: 70.0,
            min_duty: 0,
            max_duty: 100,
        }
    }

    fn mock_supervisor() -> (Supervisor<AckTransport>, SharedFrames) {
        let (transport, frames) = AckTransport::new();
        let supervisor = Supervisor::new(
            GridController::with_transport(Box::new(transport)),
            linear_0_100(),
        );
        (supervisor, frames)
    }

    #[test]
    fn next_duty_rises_immediately_to_target() {
        assert_eq!(next_duty(NEVER_APPLIED, 11), Some(11));
        assert_eq!(next_duty(40, 60), Some(60));
        assert_eq!(next_duty(99, 100), Some(100));
    }

    #[test]
    fn next_duty_holds_inside_the_hysteresis_band() {
        for target in 61..=66 {
            assert_eq!(next_duty(66, target), None, "target {target}");
        }
    }

    #[test]
    fn next_duty_decays_by_at_most_ten_points() {
        assert_eq!(next_duty(100, 30), Some(90));
        assert_eq!(next_duty(90, 30), Some(80));
        assert_eq!(next_duty(38, 30), Some(30));
    }

    #[test]
    fn next_duty_step_down_sequence_lands_on_target() {
        let mut applied = 100;
        let mut sequence = Vec::new();
        while let Some(duty) = next_duty(applied, 66) {
            applied = duty;
            sequence.push(duty);
        }
        assert_eq!(sequence, vec![90, 80, 70]);
        // 70 - 66 = 4 is inside the band; the loop holds there
        assert_eq!(next_duty(applied, 66), None);

        let mut applied = 100;
        let mut sequence = Vec::new();
        while let Some(duty) = next_duty(applied, 60) {
            applied = duty;
            sequence.push(duty);
        }
        assert_eq!(sequence, vec![90, 80, 70, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_actuates_all_six_fans() {
        let (mut supervisor, frames) = mock_supervisor();

        // f(47.5) = 50, voltage code 7
        supervisor.tick(47.5).await.unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 6);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame, &vec![0x44, i as u8 + 1, 0xC0, 0x00, 0x00, 0x07, 0x00]);
        }
        assert_eq!(supervisor.last_applied(), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_temperature_generates_no_further_traffic() {
        let (mut supervisor, frames) = mock_supervisor();

        supervisor.tick(47.5).await.unwrap();
        let after_first = frames.lock().unwrap().len();

        for _ in 0..5 {
            supervisor.tick(47.5).await.unwrap();
        }

        assert_eq!(frames.lock().unwrap().len(), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn hot_to_cold_step_decays_gradually() {
        let (mut supervisor, _frames) = mock_supervisor();

        supervisor.tick(80.0).await.unwrap(); // target 100
        assert_eq!(supervisor.last_applied(), Some(100));

        // f(30) = 11; decay by 10 per tick, landing exactly on 11
        let mut applied = Vec::new();
        for _ in 0..12 {
            supervisor.tick(30.0).await.unwrap();
            applied.push(supervisor.last_applied().unwrap());
        }

        assert_eq!(
            applied,
            vec![90, 80, 70, 60, 50, 40, 30, 20, 11, 11, 11, 11]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_the_controller_reapplies_the_duty() {
        let (mut supervisor, _frames) = mock_supervisor();

        supervisor.tick(47.5).await.unwrap();
        assert_eq!(supervisor.last_applied(), Some(50));

        let (fresh_transport, fresh_frames) = AckTransport::new();
        supervisor.replace_controller(GridController::with_transport(Box::new(fresh_transport)));
        assert_eq!(supervisor.last_applied(), None);

        // same temperature behaves like a fresh run
        supervisor.tick(47.5).await.unwrap();
        assert_eq!(fresh_frames.lock().unwrap().len(), 6);
        assert_eq!(supervisor.last_applied(), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_surfaces_wire_failures() {
        let mut supervisor = Supervisor::new(
            GridController::with_transport(Box::new(DeadTransport)),
            linear_0_100(),
        );

        let err = supervisor.tick(47.5).await.unwrap_err();
        assert!(matches!(err, GridError::Serial(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn verbose_toggle_applies_on_the_next_tick() {
        let (mut supervisor, _frames) = mock_supervisor();
        assert!(!supervisor.is_verbose());

        supervisor.queue_verbose_toggle();
        supervisor.tick(47.5).await.unwrap();
        assert!(supervisor.is_verbose());

        supervisor.queue_verbose_toggle();
        supervisor.tick(47.5).await.unwrap();
        assert!(!supervisor.is_verbose());
    }

    #[test]
    fn strikes_give_up_at_the_limit() {
        let mut strikes = Strikes::default();
        for _ in 0..MAX_STRIKES - 1 {
            assert!(!strikes.record());
        }
        assert!(strikes.record());
    }

    #[test]
    fn strikes_reset_on_success() {
        let mut strikes = Strikes::default();
        for _ in 0..MAX_STRIKES - 1 {
            assert!(!strikes.record());
        }
        strikes.reset();
        assert!(!strikes.record());
    }
}
