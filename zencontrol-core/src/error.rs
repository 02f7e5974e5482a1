use std::io;
use thiserror::Error;

use crate::types::ErrorCode;

/// Errors surfaced by the library.
///
/// Wire-level failures (a controller answering with an error code, a query
/// that produced no answer) are generally *not* errors: queries return
/// `Option` and acknowledged commands return `bool`.  This enum covers the
/// cases a caller cannot reasonably fold into "no data".
#[derive(Error, Debug)]
pub enum Error {
	/// No response arrived within the retry budget.  Absence of evidence:
	/// the controller is probably offline.
	#[error("no response from {peer} after {attempts} attempt(s)")]
	Timeout { peer: String, attempts: u32 },

	/// The controller answered 0xA3 with an error code.
	#[error("controller error: {0}")]
	Response(ErrorCode),

	/// Socket creation, bind or connect failed.
	#[error("connection error")]
	Connection(#[from] io::Error),

	/// A caller-supplied value failed a range or kind check before anything
	/// was transmitted.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Controller or listener configuration is unusable.
	#[error("configuration error: {0}")]
	Config(String),

	/// A protocol-level invariant was violated (e.g. all 256 sequence
	/// numbers in flight).
	#[error("protocol error: {0}")]
	Protocol(String),
}

impl From<std::convert::Infallible> for Error {
	fn from(_: std::convert::Infallible) -> Self {
		unreachable!()
	}
}
