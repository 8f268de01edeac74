//! Console echo of observations
//!
//! Prints a header and one comma-delimited line per observation on stdout.
//! Absent values print as `NULL`.

use std::io::Write;

use crate::observation::Observation;
use crate::{Result, SniffError};

pub const CSV_HEADER: [&str; 17] = [
    "captureTime",
    "srcMac",
    "dstMac",
    "SSID",
    "encType",
    "authMode",
    "gpsLat",
    "gpsLong",
    "strength",
    "contentLength",
    "typeExternal",
    "typeInternal",
    "srcIP",
    "dstIP",
    "srcPort",
    "dstPort",
    "sniffType",
];

const NULL: &str = "NULL";

fn or_null<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| NULL.to_string(), |v| v.to_string())
}

/// The console fields of an observation, in [`CSV_HEADER`] order
pub fn record(observation: &Observation) -> [String; 17] {
    [
        observation.formatted_time(),
        or_null(observation.src_addr),
        or_null(observation.dst_addr),
        observation.network_name_or_hidden().to_string(),
        or_null(observation.encryption().map(|e| e.as_str())),
        or_null(observation.auth_mode().map(|a| a.as_str())),
        or_null(observation.gps_lat()),
        or_null(observation.gps_lon()),
        or_null(observation.signal_dbm),
        observation.content_length.to_string(),
        observation.frame_class.as_str().to_string(),
        observation.frame_subtype.clone(),
        or_null(observation.src_ip),
        or_null(observation.dst_ip),
        or_null(observation.src_port),
        or_null(observation.dst_port),
        observation.sniff_type.as_str().to_string(),
    ]
}

/// Writes observations as CSV lines, flushing after each one
pub struct CsvEcho {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl CsvEcho {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        let writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(out);
        Self { writer }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record(CSV_HEADER).map_err(csv_error)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn echo(&mut self, observation: &Observation) -> Result<()> {
        self.writer.write_record(record(observation)).map_err(csv_error)?;
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_error(err: csv::Error) -> SniffError {
    SniffError::Io(err.into())
}
