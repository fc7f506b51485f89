//! Bias sequencing and background compliance monitoring.
//!
//! A [`BiasController`] ramps the bias up and down with the ramp settings it
//! was given and, once started, polls the source from its own thread while
//! control is enabled. Toggling control or stopping wakes the thread at once
//! instead of waiting out the poll interval.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    config::BiasSettings,
    error::{Error, Result},
    response::Measurement,
    source::{RampOutcome, ThreadSafeSource, Value},
    transport::Transport,
    units::{Volts, to_std},
};

/// Called from the monitoring thread with a reading taken in compliance.
pub type ComplianceCallback = Box<dyn Fn(&Measurement) + Send + Sync>;

/// Called from the monitoring thread with the error that ended it.
pub type ErrorCallback<I> = Box<dyn Fn(&Error<I>) + Send + Sync>;

/// Snapshot of the controller flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub control_enabled: bool,
    pub bias_on: bool,
    /// The monitoring thread is (still) looping.
    pub running: bool,
    /// [`BiasController::stop`] was called. The monitor cannot be started again.
    pub stopped: bool,
}

struct Shared<S: Transport, const L: usize> {
    source: Arc<ThreadSafeSource<S, L>>,
    settings: BiasSettings,
    state: Mutex<ControllerState>,
    wake: Condvar,
    on_compliance: ComplianceCallback,
    on_error: ErrorCallback<S::Error>,
}

pub struct BiasController<S: Transport, const L: usize = 128> {
    shared: Arc<Shared<S, L>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Transport + Send + 'static, const L: usize> BiasController<S, L> {
    pub fn new(
        source: Arc<ThreadSafeSource<S, L>>,
        settings: BiasSettings,
        on_compliance: impl Fn(&Measurement) + Send + Sync + 'static,
        on_error: impl Fn(&Error<S::Error>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                settings,
                state: Mutex::new(ControllerState::default()),
                wake: Condvar::new(),
                on_compliance: Box::new(on_compliance),
                on_error: Box::new(on_error),
            }),
            worker: None,
        }
    }

    pub fn source(&self) -> &Arc<ThreadSafeSource<S, L>> {
        &self.shared.source
    }

    pub fn settings(&self) -> &BiasSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> ControllerState {
        *self.shared.state.lock()
    }

    /// Spawn the monitoring thread. Does nothing if it was already started or
    /// if the controller has been stopped.
    pub fn start(&mut self) -> Result<(), S::Error> {
        if self.worker.is_some() {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                log::warn!("Bias monitor not started: controller already stopped");
                return Ok(());
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("bias-monitor".into())
            .spawn(move || shared.run());
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().running = false;
                Err(Error::Spawn(e))
            }
        }
    }

    /// Ramp to the configured operating point.
    ///
    /// If the ramp trips compliance the compliance callback is invoked and the
    /// output is left at the step that tripped.
    pub fn enable_bias(&self) -> Result<(), S::Error> {
        let settings = &self.shared.settings;
        let target = Value::new(settings.voltage, settings.compliance);

        let outcome = self.shared.source.lock().gradual_set(
            target,
            settings.ramp_step,
            settings.ramp_delay(),
            settings.check_compliance,
        )?;

        match outcome {
            RampOutcome::Reached => {
                log::info!("Bias enabled at {target}");
                self.update(|state| state.bias_on = true);
                Ok(())
            }
            RampOutcome::ComplianceTripped(measurement) => {
                (self.shared.on_compliance)(&measurement);
                self.shared.wake.notify_all();
                Err(Error::ComplianceTripped(measurement))
            }
        }
    }

    /// Ramp back to zero and put the output in standby.
    pub fn disable_bias(&self) -> Result<(), S::Error> {
        let settings = &self.shared.settings;
        {
            let mut source = self.shared.source.lock();
            source.gradual_set(
                Value::new(Volts::ZERO, settings.compliance),
                settings.ramp_step,
                settings.ramp_delay(),
                false,
            )?;
            source.off()?;
        }
        log::info!("Bias disabled");
        self.update(|state| state.bias_on = false);
        Ok(())
    }

    pub fn enable_control(&self) {
        log::info!("Bias control enabled");
        self.update(|state| state.control_enabled = true);
    }

    pub fn disable_control(&self) {
        log::info!("Bias control disabled");
        self.update(|state| state.control_enabled = false);
    }

    /// Ask the monitoring thread to exit. Call [`BiasController::join`] afterwards.
    ///
    /// Stopping is final; later calls to [`BiasController::start`] do nothing.
    pub fn stop(&self) {
        self.update(|state| {
            state.running = false;
            state.stopped = true;
        });
    }

    /// Wait for the monitoring thread to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Bias monitor thread panicked");
            }
        }
    }

    fn update(&self, change: impl FnOnce(&mut ControllerState)) {
        change(&mut self.shared.state.lock());
        self.shared.wake.notify_all();
    }
}

impl<S: Transport, const L: usize> Shared<S, L> {
    fn run(&self) {
        log::info!("Bias monitor started");
        let interval = to_std(self.settings.poll_interval());
        let mut state = self.state.lock();

        while state.running {
            let wait = self.wake.wait_for(&mut state, interval);
            // Woken on purpose: re-check the flags without measuring.
            if !wait.timed_out() || !state.running || !state.control_enabled {
                continue;
            }

            let keep_running = MutexGuard::unlocked(&mut state, || self.poll());
            if !keep_running {
                state.running = false;
            }
        }
        log::info!("Bias monitor stopped");
    }

    /// Take one reading. Returns false if the loop has to end.
    fn poll(&self) -> bool {
        match self.source.measure() {
            Ok(measurement) => {
                if measurement.in_compliance {
                    (self.on_compliance)(&measurement);
                }
                true
            }
            Err(e) => {
                log::error!("Bias monitor failed: {e}");
                (self.on_error)(&e);
                false
            }
        }
    }
}

impl<S: Transport, const L: usize> Drop for BiasController<S, L> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                log::error!("BiasController dropped while its monitor thread is running");
                std::process::abort();
            }
            if worker.join().is_err() {
                log::error!("Bias monitor thread panicked");
            }
        }
    }
}
