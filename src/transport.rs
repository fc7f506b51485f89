//! The byte stream the instrument is reached over.
//!
//! Any [`embedded_io::Read`] + [`embedded_io::Write`] stream can carry the
//! protocol. GPIB style buses also support clearing the device and returning
//! it to front-panel control; streams that cannot do either keep the defaults.

/// Bidirectional byte stream to the instrument.
pub trait Transport: embedded_io::Read + embedded_io::Write {
    /// Reset the stream's error state and discard anything pending.
    fn clear(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Hand the instrument back to front-panel control.
    fn go_local(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use serial::{IoError, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use super::Transport;

    /// [`std::io::Error`] with an [`embedded_io::Error`] kind.
    #[derive(Debug)]
    pub struct IoError(pub std::io::Error);

    impl core::fmt::Display for IoError {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for IoError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    impl embedded_io::Error for IoError {
        fn kind(&self) -> embedded_io::ErrorKind {
            match self.0.kind() {
                std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
                std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
                std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
                std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
                std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
                std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
                std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
                std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
                _ => embedded_io::ErrorKind::Other,
            }
        }
    }

    /// A serial port, or a USB-GPIB adapter presenting itself as one.
    pub struct SerialTransport(Box<dyn serialport::SerialPort>);

    impl SerialTransport {
        pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
            Self(port)
        }

        /// Open `path` at `baud_rate` with the given read timeout.
        pub fn open(
            path: &str,
            baud_rate: u32,
            timeout: std::time::Duration,
        ) -> Result<Self, serialport::Error> {
            let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
            Ok(Self(port))
        }
    }

    impl embedded_io::ErrorType for SerialTransport {
        type Error = IoError;
    }

    impl embedded_io::Read for SerialTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            std::io::Read::read(&mut self.0, buf).map_err(IoError)
        }
    }

    impl embedded_io::Write for SerialTransport {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            std::io::Write::write(&mut self.0, buf).map_err(IoError)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            std::io::Write::flush(&mut self.0).map_err(IoError)
        }
    }

    impl Transport for SerialTransport {
        fn clear(&mut self) -> Result<(), Self::Error> {
            self.0
                .clear(serialport::ClearBuffer::All)
                .map_err(|e| IoError(e.into()))
        }
    }
}
