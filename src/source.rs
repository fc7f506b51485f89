//! Serialised access to one instrument, with a cache of the last commanded value.
//!
//! Every operation exists on [`SourceGuard`], which holds the lock for as long
//! as it lives. The methods on [`ThreadSafeSource`] lock, delegate and unlock,
//! so a caller that needs several steps without another thread getting in
//! between takes the guard with [`ThreadSafeSource::lock`] instead.

use core::fmt;

use parking_lot::{Mutex, MutexGuard};

use crate::{
    error::{Error, Result},
    response::Measurement,
    smu::Keithley237,
    transport::Transport,
    units::{Amperes, Millis, Volts, to_std},
};

/// A commanded operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value {
    pub voltage: Volts,
    pub compliance: Amperes,
}

impl Value {
    pub const fn new(voltage: Volts, compliance: Amperes) -> Self {
        Self {
            voltage,
            compliance,
        }
    }

    /// Exact equality of both fields, bit for bit.
    pub fn bit_eq(&self, other: &Value) -> bool {
        self.voltage.bit_eq(other.voltage) && self.compliance.bit_eq(other.compliance)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (compliance {})", self.voltage, self.compliance)
    }
}

/// How a ramp ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RampOutcome {
    Reached,
    /// The reading after a step showed the source at its compliance limit.
    /// The output is left at that step.
    ComplianceTripped(Measurement),
}

struct SourceState<S: Transport, const L: usize> {
    smu: Keithley237<S, L>,
    /// Last value requested through a successful set.
    cached: Value,
    on: bool,
    recording: bool,
    history: Vec<Measurement>,
}

/// A [`Keithley237`] shared between threads.
pub struct ThreadSafeSource<S: Transport, const L: usize = 128> {
    state: Mutex<SourceState<S, L>>,
}

/// Exclusive access to a [`ThreadSafeSource`] until dropped.
pub struct SourceGuard<'a, S: Transport, const L: usize = 128> {
    state: MutexGuard<'a, SourceState<S, L>>,
}

impl<S: Transport, const L: usize> ThreadSafeSource<S, L> {
    /// Wrap `smu`, assumed to be in standby.
    pub fn new(smu: Keithley237<S, L>) -> Self {
        Self {
            state: Mutex::new(SourceState {
                smu,
                cached: Value::new(Volts::ZERO, Amperes::ZERO),
                on: false,
                recording: false,
                history: Vec::new(),
            }),
        }
    }

    /// Block until no other caller uses the source.
    pub fn lock(&self) -> SourceGuard<'_, S, L> {
        SourceGuard {
            state: self.state.lock(),
        }
    }

    pub fn set(&self, value: Value) -> Result<Value, S::Error> {
        self.lock().set(value)
    }

    pub fn measure(&self) -> Result<Measurement, S::Error> {
        self.lock().measure()
    }

    pub fn gradual_set(
        &self,
        target: Value,
        step: Volts,
        delay: Millis,
        check_compliance: bool,
    ) -> Result<RampOutcome, S::Error> {
        self.lock()
            .gradual_set(target, step, delay, check_compliance)
    }

    pub fn off(&self) -> Result<(), S::Error> {
        self.lock().off()
    }

    pub fn is_on(&self) -> bool {
        self.lock().is_on()
    }

    pub fn value(&self) -> Value {
        self.lock().value()
    }

    pub fn set_recording(&self, enabled: bool) {
        self.lock().set_recording(enabled)
    }

    /// Copy of the recorded measurements.
    pub fn history(&self) -> Vec<Measurement> {
        self.lock().history().to_vec()
    }

    pub fn take_history(&self) -> Vec<Measurement> {
        self.lock().take_history()
    }

    pub fn clear_history(&self) {
        self.lock().clear_history()
    }
}

impl<S: Transport, const L: usize> SourceGuard<'_, S, L> {
    /// Apply `value` unless the output is already on at exactly that value.
    ///
    /// Returns the driver's readback, or the cached value when nothing was sent.
    pub fn set(&mut self, value: Value) -> Result<Value, S::Error> {
        if self.state.on && self.state.cached.bit_eq(&value) {
            return Ok(self.state.cached);
        }
        let applied = self.state.smu.set(value)?;
        self.state.cached = value;
        self.state.on = true;
        Ok(applied)
    }

    pub fn measure(&mut self) -> Result<Measurement, S::Error> {
        let measurement = self.state.smu.measure()?;
        if self.state.recording {
            self.state.history.push(measurement.clone());
        }
        Ok(measurement)
    }

    /// Walk the output to `target.voltage` in steps of at most `step`.
    ///
    /// Waits `delay` after each step and, with `check_compliance`, stops at the
    /// first reading that shows compliance. A target outside the instrument
    /// limits is rejected before the first step. Nothing is undone on failure;
    /// the output stays wherever the last successful step put it.
    pub fn gradual_set(
        &mut self,
        target: Value,
        step: Volts,
        delay: Millis,
        check_compliance: bool,
    ) -> Result<RampOutcome, S::Error> {
        let accuracy = Keithley237::<S, L>::ACCURACY;
        // Steps finer than the output accuracy are not supported.
        if !(step.value() >= accuracy.value()) || !step.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "ramp step must be finite and at least {accuracy}, got {step}"
            )));
        }
        if !target.voltage.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "ramp target must be finite, got {}",
                target.voltage
            )));
        }
        self.state.smu.check_limits(&target)?;

        loop {
            let current = self.state.cached.voltage;
            let remaining = target.voltage - current;
            if remaining.abs().value() < accuracy.value() {
                log::debug!("Ramp reached {}", target.voltage);
                return Ok(RampOutcome::Reached);
            }

            let next = if remaining.abs().value() <= step.value() {
                target.voltage
            } else {
                current + step * remaining.signum()
            };
            self.set(Value::new(next, target.compliance))?;
            std::thread::sleep(to_std(delay));

            if check_compliance {
                let measurement = self.measure()?;
                if measurement.in_compliance {
                    log::warn!(
                        "Ramp to {} stopped at {}: compliance reached",
                        target.voltage,
                        next
                    );
                    return Ok(RampOutcome::ComplianceTripped(measurement));
                }
            }
        }
    }

    pub fn off(&mut self) -> Result<(), S::Error> {
        self.state.smu.off()?;
        self.state.cached.voltage = Volts::ZERO;
        self.state.on = false;
        Ok(())
    }

    pub fn is_on(&self) -> bool {
        self.state.on
    }

    /// Last successfully requested value.
    pub fn value(&self) -> Value {
        self.state.cached
    }

    /// Record every following measurement into the history.
    pub fn set_recording(&mut self, enabled: bool) {
        self.state.recording = enabled;
    }

    pub fn is_recording(&self) -> bool {
        self.state.recording
    }

    pub fn history(&self) -> &[Measurement] {
        &self.state.history
    }

    pub fn take_history(&mut self) -> Vec<Measurement> {
        std::mem::take(&mut self.state.history)
    }

    pub fn clear_history(&mut self) {
        self.state.history.clear();
    }

    /// Direct access to the driver, e.g. for status queries. Bypasses the cache.
    pub fn driver(&mut self) -> &mut Keithley237<S, L> {
        &mut self.state.smu
    }

    /// Release the lock.
    pub fn unlock(self) {}
}
