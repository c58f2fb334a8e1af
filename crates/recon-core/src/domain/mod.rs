pub mod errors;

pub use errors::{HarnessError, HarnessErrorCategory, HarnessResult};

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Default port the reconstruction server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 9003;

/// Process exit status reported when a completed run fails its verdict.
///
/// Unix truncates exit statuses to eight bits, so the parent observes 156.
pub const TEST_FAILURE_EXIT_CODE: i32 = -100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Server,
    FormatConversion,
    ProtocolConversion,
    Reconstruction,
}

impl Stage {
    pub const CLIENT_STAGES: [Stage; 3] = [
        Stage::FormatConversion,
        Stage::ProtocolConversion,
        Stage::Reconstruction,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "SERVER",
            Self::FormatConversion => "FORMAT_CONVERSION",
            Self::ProtocolConversion => "PROTOCOL_CONVERSION",
            Self::Reconstruction => "RECONSTRUCTION",
        }
    }

    pub const fn program(self) -> &'static str {
        match self {
            Self::Server => "gadgetron",
            Self::FormatConversion => "siemens_to_HDF5",
            Self::ProtocolConversion => "siemens_mriclient",
            Self::Reconstruction => "mriclient",
        }
    }

    pub const fn progress_message(self) -> &'static str {
        match self {
            Self::Server => "Starting reconstruction server",
            Self::FormatConversion => "Converting Siemens *.dat file to Siemens HDF5",
            Self::ProtocolConversion => "Converting Siemens HDF5 to ISMRMRD.",
            Self::Reconstruction => "Running Gadgetron recon",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}
