use crate::{
    command::{
        Command, EXECUTE, OperateMode, SourceFunction, SourceMode, StatusQuery, Trigger,
        output_items,
    },
    config::Configuration,
    error::{Error, Result},
    range::{CURRENT_RANGES, VOLTAGE_RANGES},
    response::{ComplianceValue, Measurement, Response},
    source::Value,
    status::{ErrorStatus, MachineStatus, WarningStatus},
    transport::Transport,
    units::{Amperes, Millis, Volts},
};

/// Driver for a Keithley 237 source-measure unit used as a voltage bias supply.
///
/// You can create one over any [Transport]. Every state changing command goes
/// through the same transaction: send the command and the execute token, then
/// read back the error and the warning status words. A command is only
/// considered applied once both come back clean.
///
/// `L` bounds the length of a single reply line.
pub struct Keithley237<S: Transport, const L: usize = 128> {
    transport: S,
    config: Configuration,
}

impl<S: Transport, const L: usize> Keithley237<S, L> {
    /// Smallest voltage step the source resolves on its 1100 V range.
    pub const ACCURACY: Volts = Volts(0.1);

    /// Take over the instrument on `transport` and apply `config`.
    pub fn new(transport: S, config: Configuration) -> Result<Self, S::Error> {
        let mut smu = Self { transport, config };
        smu.prepare();
        smu.configure()?;
        log::info!("Connected to Keithley 237 at {}", smu.config.address());
        Ok(smu)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Execute whatever the instrument was left with. Failures only reset the transport.
    fn prepare(&mut self) {
        if let Err(e) = self.write_line("") {
            log::warn!("Flushing stale instrument state failed: {e}");
            if self.transport.clear().is_err() {
                log::warn!("Clearing the transport failed as well");
            }
        }
    }

    fn configure(&mut self) -> Result<(), S::Error> {
        self.send_and_check(&Command::output_format(
            output_items::SOURCE | output_items::MEASURE,
            0,
            0,
        ))?;
        self.send_and_check(&Command::filter(self.config.filter_mode()))?;
        self.send_and_check(&Command::integration_time(
            self.config.integration_time_mode(),
        ))?;
        Ok(())
    }

    /// Fail with [Error::OutOfRange] if `value` exceeds the largest voltage
    /// range or the configured compliance ceiling. Nothing is sent.
    pub fn check_limits(&self, value: &Value) -> Result<(), S::Error> {
        let voltage_limit = VOLTAGE_RANGES.last_value();
        if !(value.voltage.abs().value() <= voltage_limit.value()) {
            return Err(Error::OutOfRange {
                quantity: "voltage",
                requested: value.voltage.to_string(),
                limit: voltage_limit.to_string(),
            });
        }
        let compliance_limit = self.config.max_compliance();
        if !(value.compliance.abs().value() <= compliance_limit.value()) {
            return Err(Error::OutOfRange {
                quantity: "compliance",
                requested: value.compliance.to_string(),
                limit: compliance_limit.to_string(),
            });
        }
        Ok(())
    }

    /// Apply `value` and switch the output on.
    ///
    /// Returns the voltage measured afterwards together with the compliance
    /// the instrument reports as committed.
    pub fn set(&mut self, value: Value) -> Result<Value, S::Error> {
        self.check_limits(&value)?;

        let compliance_range = CURRENT_RANGES
            .autorange_mode()
            .unwrap_or_else(|| CURRENT_RANGES.last_mode());

        self.send_and_check(&Command::source_function(
            SourceMode::Voltage,
            SourceFunction::Dc,
        ))?;
        self.send_and_check(&Command::compliance(value.compliance, compliance_range))?;
        self.send_and_check(&Command::bias(
            value.voltage,
            VOLTAGE_RANGES.last_mode(),
            Millis::from_ticks(0),
        ))?;
        let operate = Command::operate(OperateMode::Operate);
        self.send_and_check(&operate)?;
        self.send_and_check(&Command::trigger(Trigger::Immediate))?;

        // A rejected command may leave the status words clean.
        if self.machine_status()?.operate != OperateMode::Operate {
            return Err(Error::Device {
                message: "Output did not enter operate mode".into(),
                command: operate.encode(),
            });
        }
        let compliance = self.compliance()?;
        let measurement = self.measure()?;

        log::info!(
            "Output on at {} (compliance {compliance})",
            measurement.voltage
        );
        Ok(Value::new(measurement.voltage, compliance))
    }

    /// Trigger a reading and return it.
    pub fn measure(&mut self) -> Result<Measurement, S::Error> {
        let trigger = Command::trigger(Trigger::Immediate);
        self.send_and_check(&trigger)?;
        let line = self.read_line(&trigger.encode())?;
        let measurement = Measurement::parse(&line)?;
        if measurement.in_compliance {
            log::warn!(
                "In compliance at {}: {}",
                measurement.voltage,
                measurement.current
            );
        }
        Ok(measurement)
    }

    /// Put the output in standby. Harmless if it already is.
    pub fn off(&mut self) -> Result<(), S::Error> {
        self.send_and_check(&Command::operate(OperateMode::Standby))?;
        log::info!("Output in standby");
        Ok(())
    }

    pub fn error_status(&mut self) -> Result<ErrorStatus, S::Error> {
        self.query(StatusQuery::ErrorStatus)
    }

    pub fn warning_status(&mut self) -> Result<WarningStatus, S::Error> {
        self.query(StatusQuery::WarningStatus)
    }

    pub fn machine_status(&mut self) -> Result<MachineStatus, S::Error> {
        self.query(StatusQuery::MachineStatus)
    }

    /// Compliance level currently committed by the instrument.
    pub fn compliance(&mut self) -> Result<Amperes, S::Error> {
        let reply: ComplianceValue = self.query(StatusQuery::ComplianceValue)?;
        Ok(reply.current)
    }

    /// Send `command`, then fail if either status word reports a problem.
    pub fn send_and_check(&mut self, command: &Command) -> Result<(), S::Error> {
        let text = command.encode();
        self.write_line(&text)?;

        let errors = self.error_status()?;
        if errors.has_errors() {
            return Err(Error::Device {
                message: errors.message(),
                command: text,
            });
        }

        let warnings = self.warning_status()?;
        if warnings.has_warnings() {
            if self.config.strict_warnings() || !warnings.is_advisory_only() {
                return Err(Error::DeviceWarning {
                    message: warnings.message(),
                    command: text,
                });
            }
            log::warn!("{text}: {}", warnings.message());
        }
        Ok(())
    }

    fn query<R: Response>(&mut self, query: StatusQuery) -> Result<R, S::Error> {
        let text = Command::status(query).encode();
        self.write_line(&text)?;
        let line = self.read_line(&text)?;
        Ok(R::parse(&line)?)
    }

    /// Write `text` followed by the execute token and a line terminator.
    fn write_line(&mut self, text: &str) -> Result<(), S::Error> {
        log::debug!("-> {text}{EXECUTE}");
        let transport_error = |inner| Error::Transport {
            command: text.to_string(),
            inner,
        };
        self.transport
            .write_all(text.as_bytes())
            .map_err(transport_error)?;
        self.transport
            .write_all(EXECUTE.as_bytes())
            .map_err(transport_error)?;
        self.transport.write_all(b"\n").map_err(transport_error)?;
        self.transport.flush().map_err(transport_error)?;
        Ok(())
    }

    /// Read one reply line, without its terminator.
    fn read_line(&mut self, command: &str) -> Result<String, S::Error> {
        let mut buffer: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let count = self
                .transport
                .read(&mut byte)
                .map_err(|inner| Error::Transport {
                    command: command.to_string(),
                    inner,
                })?;
            if count == 0 {
                return Err(Error::Eof {
                    command: command.to_string(),
                });
            }
            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                other => buffer.push(other).map_err(|_| Error::BufferOverflow)?,
            }
        }
        let line = String::from_utf8_lossy(&buffer).into_owned();
        log::debug!("<- {line}");
        Ok(line)
    }
}

impl<S: Transport, const L: usize> Drop for Keithley237<S, L> {
    fn drop(&mut self) {
        if let Err(e) = self.off() {
            log::error!("Could not put the output in standby on close: {e}");
        }
        if self.config.go_local_on_close() && self.transport.go_local().is_err() {
            log::error!("Could not return the instrument to local control");
        }
    }
}
