//! We use this mocking module in unit tests to emulate the instrument on the other end of the wire.
//!
//! It decodes every command line written to it, keeps just enough device state
//! to answer status queries, and makes up a reading whenever it is read with
//! nothing queued, the way the real instrument talks when addressed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::transport::Transport;

/// Our mock type used to emulate the instrument's serial link.
pub struct MockSerial {
    shared: Arc<Mutex<MockState>>,
}

/// Second handle on the same mock, kept by the test after the mock moved into a driver.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Generic simulated error for testing
    SimulatedError,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "simulated serial error")
    }
}

impl std::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

#[derive(Default)]
struct MockState {
    /// Bytes of the line currently being written.
    partial: Vec<u8>,
    /// Every complete line written, with the thread that wrote it.
    transcript: Vec<(ThreadId, String)>,
    /// Bytes waiting to be read.
    outgoing: VecDeque<u8>,

    operate: bool,
    voltage: f64,
    compliance: f64,
    filter: u8,
    integration_time: u8,
    output_format: (u8, u8, u8),

    pending_errors: u32,
    pending_warnings: u16,
    persistent_errors: u32,
    compliance_threshold: Option<f64>,
    ignore_operate: bool,
    measurement_override: Option<String>,
    rejected: Option<(String, u32)>,

    write_failures: usize,
    read_error: bool,
    eof: bool,
    clear_count: usize,
    go_local_count: usize,
}

const ILLEGAL_COMMAND: u32 = 1 << 1;

impl MockState {
    fn execute(&mut self, line: &str) {
        let Some(body) = line.strip_suffix('X') else {
            self.pending_errors |= ILLEGAL_COMMAND;
            return;
        };
        if body.is_empty() {
            return;
        }
        let rejected = match &self.rejected {
            Some((prefix, mask)) if body.starts_with(prefix.as_str()) => Some(*mask),
            _ => None,
        };
        if let Some(mask) = rejected {
            self.pending_errors |= mask;
            return;
        }
        let (name, rest) = body.split_at(1);
        let params: Vec<&str> = rest.split(',').collect();
        let number = |index: usize| params.get(index).and_then(|p| p.parse::<f64>().ok());
        let code = |index: usize| params.get(index).and_then(|p| p.parse::<u8>().ok());

        match name {
            "F" | "H" => {}
            "L" => match number(0) {
                Some(level) => self.compliance = level,
                None => self.pending_errors |= ILLEGAL_COMMAND,
            },
            "B" => match number(0) {
                Some(level) => self.voltage = level,
                None => self.pending_errors |= ILLEGAL_COMMAND,
            },
            "N" => {
                if !self.ignore_operate {
                    self.operate = code(0) == Some(1);
                }
            }
            "G" => {
                self.output_format = (
                    code(0).unwrap_or_default(),
                    code(1).unwrap_or_default(),
                    code(2).unwrap_or_default(),
                )
            }
            "P" => self.filter = code(0).unwrap_or_default(),
            "S" => self.integration_time = code(0).unwrap_or_default(),
            "U" => match code(0) {
                Some(1) => {
                    let mask = std::mem::take(&mut self.pending_errors) | self.persistent_errors;
                    self.reply(format!("ERS{}", bits(mask, 26)));
                }
                Some(9) => {
                    let mask = std::mem::take(&mut self.pending_warnings);
                    self.reply(format!("WRS{}", bits(u32::from(mask), 10)));
                }
                Some(5) => self.reply(format!("ICP{:+.4E}", self.compliance)),
                Some(3) => {
                    let (items, format, lines) = self.output_format;
                    self.reply(format!(
                        "MSTG{items},{format},{lines}J0K0M000,0N{}O0P{}R1S{}T0,0,0,0V1W0Y0Z0",
                        u8::from(self.operate),
                        self.filter,
                        self.integration_time
                    ));
                }
                _ => self.pending_errors |= ILLEGAL_COMMAND,
            },
            _ => self.pending_errors |= ILLEGAL_COMMAND,
        }
    }

    fn reply(&mut self, line: String) {
        self.outgoing.extend(line.bytes());
        self.outgoing.extend(b"\r\n");
    }

    fn in_compliance(&self) -> bool {
        self.compliance_threshold
            .is_some_and(|threshold| self.voltage.abs() >= threshold)
    }

    fn reading(&mut self) -> String {
        if let Some(line) = self.measurement_override.take() {
            return line;
        }
        let (prefix, current) = if self.in_compliance() {
            ("OSDCV", self.compliance * self.voltage.signum())
        } else {
            // 1 GOhm load.
            ("NSDCV", self.voltage / 1e9)
        };
        format!("{prefix}{:+.4E},NMDCI{current:+.4E}", self.voltage)
    }
}

fn bits(mask: u32, count: usize) -> String {
    (0..count)
        .map(|bit| if mask & (1 << bit) != 0 { '1' } else { '0' })
        .collect()
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.shared.lock();
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(MockSerialError::SimulatedError);
        }

        for &byte in buf {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&std::mem::take(&mut state.partial))
                    .trim_end_matches('\r')
                    .to_string();
                state
                    .transcript
                    .push((std::thread::current().id(), line.clone()));
                state.execute(&line);
            } else {
                state.partial.push(byte);
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.shared.lock();
        if state.read_error {
            return Err(MockSerialError::SimulatedError);
        }

        if state.outgoing.is_empty() {
            if state.eof {
                return Ok(0);
            }
            let line = state.reading();
            state.reply(line);
        }

        let bytes_to_read = core::cmp::min(buf.len(), state.outgoing.len());
        for slot in buf.iter_mut().take(bytes_to_read) {
            // Length checked above.
            *slot = state.outgoing.pop_front().unwrap_or_default();
        }
        Ok(bytes_to_read)
    }
}

impl Transport for MockSerial {
    fn clear(&mut self) -> Result<(), Self::Error> {
        let mut state = self.shared.lock();
        state.clear_count += 1;
        state.partial.clear();
        state.outgoing.clear();
        Ok(())
    }

    fn go_local(&mut self) -> Result<(), Self::Error> {
        self.shared.lock().go_local_count += 1;
        Ok(())
    }
}

impl MockSerial {
    /// Create a new MockSerial instance in standby at 0 V.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MockHandle {
    /// Every line written so far, terminators stripped.
    pub fn lines(&self) -> Vec<String> {
        self.shared
            .lock()
            .transcript
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn transcript(&self) -> Vec<(ThreadId, String)> {
        self.shared.lock().transcript.clone()
    }

    pub fn clear_transcript(&self) {
        self.shared.lock().transcript.clear();
    }

    /// Levels of every bias command written, in order.
    pub fn commanded_voltages(&self) -> Vec<f64> {
        self.lines()
            .iter()
            .filter_map(|line| line.strip_prefix('B'))
            .filter_map(|rest| rest.split(',').next()?.parse().ok())
            .collect()
    }

    /// Report `mask` on the next error status query only.
    pub fn inject_errors(&self, mask: u32) {
        self.shared.lock().pending_errors |= mask;
    }

    /// Report `mask` on the next warning status query only.
    pub fn inject_warnings(&self, mask: u16) {
        self.shared.lock().pending_warnings |= mask;
    }

    /// Report `mask` on every error status query.
    pub fn set_persistent_errors(&self, mask: u32) {
        self.shared.lock().persistent_errors = mask;
    }

    /// Refuse every command starting with `prefix`, flagging `mask` on the next error query.
    pub fn reject_commands(&self, prefix: &str, mask: u32) {
        self.shared.lock().rejected = Some((prefix.to_string(), mask));
    }

    /// Readings report compliance once `|bias| >= threshold`.
    pub fn set_compliance_threshold(&self, threshold: Option<f64>) {
        self.shared.lock().compliance_threshold = threshold;
    }

    /// Silently drop operate/standby commands.
    pub fn set_ignore_operate(&self, ignore: bool) {
        self.shared.lock().ignore_operate = ignore;
    }

    /// Replace the next generated reading with `line`.
    pub fn override_next_reading(&self, line: &str) {
        self.shared.lock().measurement_override = Some(line.to_string());
    }

    /// Fail the next `count` writes.
    pub fn fail_writes(&self, count: usize) {
        self.shared.lock().write_failures = count;
    }

    pub fn set_read_error(&self, should_error: bool) {
        self.shared.lock().read_error = should_error;
    }

    /// Report end of stream instead of making up readings.
    pub fn set_eof(&self, eof: bool) {
        self.shared.lock().eof = eof;
    }

    pub fn operate(&self) -> bool {
        self.shared.lock().operate
    }

    pub fn voltage(&self) -> f64 {
        self.shared.lock().voltage
    }

    pub fn clear_count(&self) -> usize {
        self.shared.lock().clear_count
    }

    pub fn go_local_count(&self) -> usize {
        self.shared.lock().go_local_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    fn read_line(mock: &mut MockSerial) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            mock.read(&mut byte).unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap().trim_end().to_string()
    }

    #[test]
    fn test_new_mock_serial() {
        let mock = MockSerial::new();
        let handle = mock.handle();
        assert!(handle.lines().is_empty());
        assert!(!handle.operate());
        assert_eq!(handle.voltage(), 0.0);
    }

    #[test]
    fn test_lines_split_on_newline() {
        let mut mock = MockSerial::new();
        mock.write_all(b"B1.0e+00,").unwrap();
        mock.write_all(b"4,0X\nN1X\n").unwrap();
        let handle = mock.handle();
        assert_eq!(handle.lines(), vec!["B1.0e+00,4,0X", "N1X"]);
        assert_eq!(handle.voltage(), 1.0);
        assert!(handle.operate());
        assert_eq!(handle.commanded_voltages(), vec![1.0]);
    }

    #[test]
    fn test_status_queries() {
        let mut mock = MockSerial::new();
        mock.handle().inject_errors(1 << 10);
        mock.write_all(b"U1X\n").unwrap();
        assert_eq!(read_line(&mut mock), "ERS00000000001000000000000000");
        // One-shot.
        mock.write_all(b"U1X\n").unwrap();
        assert_eq!(read_line(&mut mock), "ERS00000000000000000000000000");

        mock.write_all(b"L1.0e-02,0X\nU5X\n").unwrap();
        assert_eq!(read_line(&mut mock), "ICP+1.0000E-2");
    }

    #[test]
    fn test_unknown_command_sets_error() {
        let mut mock = MockSerial::new();
        mock.write_all(b"Q7X\nU1X\n").unwrap();
        assert_eq!(read_line(&mut mock), "ERS01000000000000000000000000");
    }

    #[test]
    fn test_rejected_command_is_not_applied() {
        let mut mock = MockSerial::new();
        mock.handle().reject_commands("B", 1 << 10);
        mock.write_all(b"B5.0e+00,4,0X\nU1X\n").unwrap();
        assert_eq!(read_line(&mut mock), "ERS00000000001000000000000000");
        assert_eq!(mock.handle().voltage(), 0.0);
    }

    #[test]
    fn test_generated_reading() {
        let mut mock = MockSerial::new();
        mock.write_all(b"B2.0e+00,4,0X\n").unwrap();
        assert_eq!(read_line(&mut mock), "NSDCV+2.0000E0,NMDCI+2.0000E-9");

        mock.handle().set_compliance_threshold(Some(1.0));
        mock.write_all(b"L1.0e-06,0X\n").unwrap();
        assert_eq!(read_line(&mut mock), "OSDCV+2.0000E0,NMDCI+1.0000E-6");
    }

    #[test]
    fn test_write_failures_count_down() {
        let mut mock = MockSerial::new();
        mock.handle().fail_writes(1);
        assert!(matches!(mock.write(b"X\n"), Err(MockSerialError::SimulatedError)));
        assert!(mock.write(b"X\n").is_ok());
    }

    #[test]
    fn test_read_error_and_eof() {
        let mut mock = MockSerial::new();
        let handle = mock.handle();
        let mut buffer = [0u8; 4];

        handle.set_read_error(true);
        assert!(mock.read(&mut buffer).is_err());

        handle.set_read_error(false);
        handle.set_eof(true);
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_clear_discards_pending_output() {
        let mut mock = MockSerial::new();
        mock.write_all(b"U1X\n").unwrap();
        mock.clear().unwrap();
        mock.handle().set_eof(true);
        let mut buffer = [0u8; 4];
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
        assert_eq!(mock.handle().clear_count(), 1);
    }
}
