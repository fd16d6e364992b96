//! Allocation of certificate serial numbers.
//!
//! Every serial is 18 bytes long. The first byte is a configured, non-zero
//! prefix which identifies the CA instance, the remaining 17 bytes (136
//! bits) are random. The canonical string rendering is lowercase hex, zero
//! padded to 36 characters.
use std::fmt::{Display, Write};

use rand_core::{CryptoRngCore, OsRng};
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::serial_number::SerialNumber;

/// The number of random bytes following the prefix byte.
pub const SERIAL_RANDOM_BYTES: usize = 17;

/// The total length of a serial in bytes.
pub const SERIAL_LENGTH: usize = SERIAL_RANDOM_BYTES + 1;

/// The length of the canonical hex rendering of a serial.
pub const SERIAL_STRING_LENGTH: usize = SERIAL_LENGTH * 2;

pub type Result<T, E = SerialError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum SerialError {
    #[snafu(display("the serial prefix must be non-zero"))]
    ZeroSerialPrefix,

    #[snafu(display("failed to generate random serial bytes"))]
    GenerateSerial { source: rand_core::Error },

    #[snafu(display("failed to encode serial as X.509 serial number"))]
    EncodeSerial { source: x509_cert::der::Error },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Serial([u8; SERIAL_LENGTH]);

impl Serial {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Converts the serial into the X.509 representation used in
    /// certificates.
    pub fn to_serial_number(&self) -> Result<SerialNumber> {
        // The prefix byte may have its high bit set, keep the integer
        // positive.
        let mut bytes = Vec::with_capacity(SERIAL_LENGTH + 1);
        if self.0[0] & 0x80 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&self.0);

        SerialNumber::new(&bytes).context(EncodeSerialSnafu)
    }
}

impl Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

/// Renders any X.509 serial number in the canonical form, i.e. lowercase
/// hex of the unsigned value, zero padded to [`SERIAL_STRING_LENGTH`].
pub fn serial_to_string(serial: &SerialNumber) -> String {
    let bytes = serial.as_bytes();
    let first_significant = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());

    let hex = bytes[first_significant..]
        .iter()
        .fold(String::new(), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        });

    format!("{hex:0>SERIAL_STRING_LENGTH$}")
}

#[derive(Clone, Copy, Debug)]
pub struct SerialAllocator {
    prefix: u8,
}

impl SerialAllocator {
    pub fn new(prefix: u8) -> Result<Self> {
        ensure!(prefix != 0, ZeroSerialPrefixSnafu);
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Allocates a new serial using [`OsRng`].
    pub fn allocate(&self) -> Result<Serial> {
        self.allocate_with_rng(&mut OsRng)
    }

    #[instrument(name = "allocate_serial", skip(self, rng), fields(prefix = self.prefix))]
    pub fn allocate_with_rng<Rng>(&self, rng: &mut Rng) -> Result<Serial>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        let mut bytes = [0u8; SERIAL_LENGTH];
        bytes[0] = self.prefix;
        rng.try_fill_bytes(&mut bytes[1..])
            .context(GenerateSerialSnafu)?;

        Ok(Serial(bytes))
    }
}
