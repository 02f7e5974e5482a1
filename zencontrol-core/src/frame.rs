use std::convert::TryFrom;
use std::net::SocketAddr;

use byteorder::{BigEndian, ByteOrder};

use crate::error::Error;

/// First byte of every request frame.
pub const MAGIC: u8 = 0x04;

/// First two bytes of every event frame.
pub const EVENT_SENTINEL: [u8; 2] = [0x5A, 0x43];

/// Longest payload a dynamic request may carry.
pub const MAX_DYNAMIC_PAYLOAD: usize = 64;

/// XOR of every byte.  Both sides append this over all preceding bytes of a
/// frame, and verify it on ingress.
pub fn checksum(buf: &[u8]) -> u8 {
	buf.iter().fold(0u8, |acc, b| acc ^ b)
}

/// A request ready to be framed and sent to a controller.
///
/// The payload shape is fixed by the constructor used, matching the four
/// documented request framings:
///
/// * basic: exactly 4 bytes `[address, d0, d1, d2]`, zero padded
/// * colour: exactly 8 bytes `[address, level, tag, ...]`, zero padded
/// * dynamic: `[len, bytes...]`
/// * verbatim: whatever the caller supplies
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub command: u8,
	payload: Vec<u8>,
}

impl Request {
	pub fn basic(command: u8, address: u8, data: &[u8]) -> Result<Request, Error> {
		if data.len() > 3 {
			return Err(Error::InvalidArgument(format!(
				"basic request data must be at most 3 bytes, got {}",
				data.len()
			)));
		}
		let mut payload = vec![0u8; 4];
		payload[0] = address;
		payload[1..1 + data.len()].copy_from_slice(data);
		Ok(Request { command, payload })
	}

	/// `colour_bytes` is the `[level, tag, ...]` encoding produced by
	/// [crate::types::Colour::to_wire].
	pub fn colour(command: u8, address: u8, colour_bytes: &[u8]) -> Result<Request, Error> {
		if colour_bytes.len() > 7 {
			return Err(Error::InvalidArgument(format!(
				"colour request data must be at most 7 bytes, got {}",
				colour_bytes.len()
			)));
		}
		let mut payload = vec![0u8; 8];
		payload[0] = address;
		payload[1..1 + colour_bytes.len()].copy_from_slice(colour_bytes);
		Ok(Request { command, payload })
	}

	pub fn dynamic(command: u8, data: &[u8]) -> Result<Request, Error> {
		if data.len() > MAX_DYNAMIC_PAYLOAD {
			return Err(Error::InvalidArgument(format!(
				"dynamic request data must be at most {} bytes, got {}",
				MAX_DYNAMIC_PAYLOAD,
				data.len()
			)));
		}
		let mut payload = Vec::with_capacity(1 + data.len());
		payload.push(data.len() as u8);
		payload.extend_from_slice(data);
		Ok(Request { command, payload })
	}

	/// Payload passed through untouched.  Escape hatch for undocumented
	/// commands.
	pub fn verbatim(command: u8, data: &[u8]) -> Request {
		Request { command, payload: data.to_vec() }
	}

	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	/// Frame for the wire: `[magic, seq, cmd, payload..., checksum]`.
	/// Retransmissions call this with the same sequence so the frame bytes
	/// are identical across attempts.
	pub fn to_bytes(&self, seq: u8) -> Vec<u8> {
		let mut v = Vec::with_capacity(4 + self.payload.len());
		v.push(MAGIC);
		v.push(seq);
		v.push(self.command);
		v.extend_from_slice(&self.payload);
		let cs = checksum(&v);
		v.push(cs);
		v
	}
}

/// Response type byte.
///
/// The first four values arrive on the wire; `Timeout` and `Invalid` are
/// synthesised locally by the client so that callers always receive a
/// [Response] rather than an error for protocol-level failures.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
	Ok = 0xA0,
	Answer = 0xA1,
	NoAnswer = 0xA2,
	Error = 0xA3,
	Timeout = 0xAE,
	Invalid = 0xAF,
}

impl TryFrom<u8> for ResponseType {
	type Error = Error;
	fn try_from(val: u8) -> Result<ResponseType, Error> {
		match val {
			0xA0 => Ok(ResponseType::Ok),
			0xA1 => Ok(ResponseType::Answer),
			0xA2 => Ok(ResponseType::NoAnswer),
			0xA3 => Ok(ResponseType::Error),
			0xAE => Ok(ResponseType::Timeout),
			0xAF => Ok(ResponseType::Invalid),
			x => Err(Error::Protocol(format!("unknown response type 0x{:02X}", x))),
		}
	}
}

/// A parsed response frame: `[type, seq, len, data..., checksum]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	pub rtype: ResponseType,
	pub seq: u8,
	pub data: Vec<u8>,
}

impl Response {
	pub(crate) fn timeout() -> Response {
		Response { rtype: ResponseType::Timeout, seq: 0, data: Vec::new() }
	}

	fn invalid(seq: u8) -> Response {
		Response { rtype: ResponseType::Invalid, seq, data: Vec::new() }
	}

	/// Parse a datagram.  Never fails: a short packet, a length mismatch, a
	/// bad checksum or an unknown type byte all yield `Invalid`, because the
	/// network is a hostile input and a malformed datagram must not take
	/// down the reader.
	pub fn parse(datagram: &[u8]) -> Response {
		if datagram.len() < 4 {
			return Response::invalid(0);
		}
		let seq = datagram[1];
		let data_len = datagram[2] as usize;
		if datagram.len() != data_len + 4 {
			return Response::invalid(seq);
		}
		if datagram[datagram.len() - 1] != checksum(&datagram[..datagram.len() - 1]) {
			return Response::invalid(seq);
		}
		let rtype = match datagram[0] {
			0xA0 => ResponseType::Ok,
			0xA1 => ResponseType::Answer,
			0xA2 => ResponseType::NoAnswer,
			0xA3 => ResponseType::Error,
			_ => return Response::invalid(seq),
		};
		Response { rtype, seq, data: datagram[3..3 + data_len].to_vec() }
	}
}

/// A validated event datagram:
/// `[0x5A, 0x43, mac x6, target x2, code, len, payload..., checksum]`.
///
/// `target` semantics depend on the event code, so it is left raw here; the
/// dispatcher derives an [crate::types::Address] from it.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
	pub mac: [u8; 6],
	pub target: u16,
	pub code: u8,
	pub payload: Vec<u8>,
	/// Where the datagram came from.  Used to resolve the origin controller.
	pub source: SocketAddr,
}

impl EventFrame {
	/// Parse a datagram, or `None` if it is not a well-formed event.  The
	/// listener counts and drops the `None`s.
	pub fn parse(datagram: &[u8], source: SocketAddr) -> Option<EventFrame> {
		if datagram.len() < 13 || datagram[0..2] != EVENT_SENTINEL {
			return None;
		}
		let payload_len = datagram[11] as usize;
		if datagram.len() != payload_len + 13 {
			return None;
		}
		if datagram[datagram.len() - 1] != checksum(&datagram[..datagram.len() - 1]) {
			return None;
		}
		let mut mac = [0u8; 6];
		mac.copy_from_slice(&datagram[2..8]);
		Some(EventFrame {
			mac,
			target: BigEndian::read_u16(&datagram[8..10]),
			code: datagram[10],
			payload: datagram[12..12 + payload_len].to_vec(),
			source,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr() -> SocketAddr {
		"192.0.2.10:6969".parse().unwrap()
	}

	#[test]
	fn checksum_is_xor_of_preceding_bytes() {
		assert_eq!(checksum(&[]), 0);
		assert_eq!(checksum(&[0x04, 0x00, 0xA9, 0x03, 0x00, 0x00, 0x00]), 0xAE);
	}

	#[test]
	fn basic_request_frame_bytes() {
		// DALI_OFF to ECG 3, seq 0
		let req = Request::basic(0xA9, 0x03, &[]).unwrap();
		assert_eq!(req.to_bytes(0x00), vec![0x04, 0x00, 0xA9, 0x03, 0x00, 0x00, 0x00, 0xAE]);
	}

	#[test]
	fn basic_request_pads_and_rejects() {
		let req = Request::basic(0x10, 0x01, &[0xAA]).unwrap();
		assert_eq!(req.payload(), &[0x01, 0xAA, 0x00, 0x00]);
		assert!(Request::basic(0x10, 0x01, &[1, 2, 3, 4]).is_err());
	}

	#[test]
	fn colour_request_pads_to_eight() {
		// TC 4000 K at level 200 on group 2 (wire byte 66)
		let req = Request::colour(0x0E, 66, &[0xC8, 0x20, 0x0F, 0xA0]).unwrap();
		assert_eq!(req.payload(), &[66, 0xC8, 0x20, 0x0F, 0xA0, 0x00, 0x00, 0x00]);
		let wire = req.to_bytes(0x07);
		assert_eq!(wire.len(), 12);
		assert_eq!(*wire.last().unwrap(), checksum(&wire[..11]));
	}

	#[test]
	fn dynamic_request_prefixes_length() {
		let req = Request::dynamic(0x40, &[1, 2, 3]).unwrap();
		assert_eq!(req.payload(), &[3, 1, 2, 3]);
		assert!(Request::dynamic(0x40, &[0u8; 65]).is_err());
	}

	#[test]
	fn response_parse_ok() {
		let r = Response::parse(&[0xA0, 0x00, 0x00, 0xA0]);
		assert_eq!(r.rtype, ResponseType::Ok);
		assert_eq!(r.seq, 0);
		assert!(r.data.is_empty());
	}

	#[test]
	fn response_parse_answer_with_data() {
		// "Zone1"
		let mut pkt = vec![0xA1, 0x42, 0x05, 0x5A, 0x6F, 0x6E, 0x65, 0x31];
		pkt.push(checksum(&pkt));
		let r = Response::parse(&pkt);
		assert_eq!(r.rtype, ResponseType::Answer);
		assert_eq!(r.seq, 0x42);
		assert_eq!(r.data, b"Zone1");
	}

	#[test]
	fn response_parse_never_panics_on_malformed() {
		// short
		assert_eq!(Response::parse(&[0xA0, 0x00]).rtype, ResponseType::Invalid);
		// length mismatch
		assert_eq!(Response::parse(&[0xA1, 0x00, 0x05, 0x01, 0xA5]).rtype, ResponseType::Invalid);
		// bad checksum
		assert_eq!(Response::parse(&[0xA0, 0x00, 0x00, 0xFF]).rtype, ResponseType::Invalid);
		// unknown type byte
		let mut pkt = vec![0x99, 0x00, 0x00];
		pkt.push(checksum(&pkt));
		assert_eq!(Response::parse(&pkt).rtype, ResponseType::Invalid);
	}

	#[test]
	fn event_parse_level_change() {
		let mut pkt = vec![
			0x5A, 0x43, // sentinel
			0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, // mac
			0x00, 0x0A, // target 10
			0x0B, // level change v2
			0x02, // payload length
			0xFE, 0x80, // payload
		];
		pkt.push(checksum(&pkt));
		let ev = EventFrame::parse(&pkt, addr()).unwrap();
		assert_eq!(ev.mac, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
		assert_eq!(ev.target, 10);
		assert_eq!(ev.code, 0x0B);
		assert_eq!(ev.payload, vec![0xFE, 0x80]);
	}

	#[test]
	fn event_parse_drops_malformed() {
		// wrong sentinel
		let mut pkt = vec![0x5A, 0x44, 0, 0, 0, 0, 0, 0, 0, 0, 0x0B, 0x00];
		pkt.push(checksum(&pkt));
		assert!(EventFrame::parse(&pkt, addr()).is_none());

		// payload length lies
		let mut pkt = vec![0x5A, 0x43, 0, 0, 0, 0, 0, 0, 0, 0, 0x0B, 0x05, 0x01];
		pkt.push(checksum(&pkt));
		assert!(EventFrame::parse(&pkt, addr()).is_none());

		// bad checksum
		let pkt = vec![0x5A, 0x43, 0, 0, 0, 0, 0, 0, 0, 0, 0x0B, 0x00, 0x77];
		assert!(EventFrame::parse(&pkt, addr()).is_none());

		// truncated
		assert!(EventFrame::parse(&[0x5A, 0x43, 0x00], addr()).is_none());
	}
}
