//! Tool output parsers
//!
//! Thin collaborators of the artifact processor: each reads one tool's
//! output file into typed results. Parse failures are surfaced as errors and
//! left to the caller to log; a malformed file never fails a scan.

mod ffuf;
mod nmap;
mod nuclei;

pub use ffuf::{parse_ffuf, FfufOutput, FfufResult};
pub use nmap::{parse_nmap, NmapHost, NmapPort};
pub use nuclei::{parse_nuclei, NucleiFinding, NucleiOutput};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed XML in {path}: {message}")]
    Xml { path: String, message: String },
    #[error("malformed JSON in {path}: {message}")]
    Json { path: String, message: String },
}

pub type ParseResult<T> = Result<T, ParseError>;
