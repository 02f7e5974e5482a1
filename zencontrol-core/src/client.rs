use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::frame::{Request, Response, ResponseType};

/// How long to wait for a response before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);
/// Caller-supplied timeouts are clamped into this band.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the reader thread checks for shutdown.
const READ_POLL: Duration = Duration::from_millis(250);

struct PendingTable {
	next_seq: u8,
	waiters: HashMap<u8, Sender<Response>>,
}

impl PendingTable {
	/// Allocate a free sequence byte, probing forward from a monotonically
	/// incrementing counter, and register the waiter under it.
	fn register(&mut self, tx: Sender<Response>) -> Result<u8, Error> {
		for _ in 0..=255u16 {
			let proposed = self.next_seq;
			self.next_seq = self.next_seq.wrapping_add(1);
			if !self.waiters.contains_key(&proposed) {
				self.waiters.insert(proposed, tx);
				return Ok(proposed);
			}
		}
		Err(Error::Protocol("all 256 sequence numbers are in flight".into()))
	}
}

/// A request/response endpoint bound to one controller.
///
/// Multiple threads may call [Client::send] concurrently; correlation is by
/// the sequence byte, with at most one request in flight per sequence.  A
/// background thread owns the receiving half of the socket and completes
/// waiters as responses arrive.  Responses with no registered waiter (late
/// duplicates, garbage) are dropped.
pub struct Client {
	sock: UdpSocket,
	peer: SocketAddr,
	pending: Arc<Mutex<PendingTable>>,
	shutdown: Arc<AtomicBool>,
	reader: Option<JoinHandle<()>>,
}

impl Client {
	/// Bind an ephemeral local port, connect it to the controller and start
	/// the reader thread.
	pub fn connect(host: Ipv4Addr, port: u16) -> Result<Client, Error> {
		let peer = SocketAddr::from((host, port));
		let sock = UdpSocket::bind("0.0.0.0:0")?;
		sock.connect(peer)?;
		sock.set_read_timeout(Some(READ_POLL))?;

		let pending = Arc::new(Mutex::new(PendingTable { next_seq: 0, waiters: HashMap::new() }));
		let shutdown = Arc::new(AtomicBool::new(false));

		let recv_sock = sock.try_clone()?;
		let reader_pending = pending.clone();
		let reader_shutdown = shutdown.clone();
		let reader = thread::spawn(move || {
			Self::reader(recv_sock, reader_pending, reader_shutdown, peer)
		});

		debug!(%peer, "connected to controller");
		Ok(Client { sock, peer, pending, shutdown, reader: Some(reader) })
	}

	pub fn peer(&self) -> SocketAddr {
		self.peer
	}

	fn reader(
		sock: UdpSocket,
		pending: Arc<Mutex<PendingTable>>,
		shutdown: Arc<AtomicBool>,
		peer: SocketAddr,
	) {
		let mut buf = [0u8; 1024];
		loop {
			if shutdown.load(Ordering::Relaxed) {
				break;
			}
			match sock.recv(&mut buf) {
				Ok(0) => debug!(%peer, "zero-byte datagram"),
				Ok(n) => {
					let resp = Response::parse(&buf[..n]);
					if resp.rtype == ResponseType::Invalid {
						debug!(%peer, len = n, "dropping malformed response");
						continue;
					}
					let waiter = pending.lock().unwrap().waiters.remove(&resp.seq);
					match waiter {
						// A send error here means the waiter gave up
						// (timeout or cancellation); the late response is
						// dropped on the floor.
						Some(tx) => {
							let _ = tx.send(resp);
						}
						None => trace!(%peer, seq = resp.seq, "response with no waiter"),
					}
				}
				Err(e) => match e.kind() {
					std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => continue,
					// Connected UDP sockets surface ICMP errors here; the
					// in-flight requests will time out on their own.
					_ if shutdown.load(Ordering::Relaxed) => break,
					_ => debug!(%peer, error = %e, "recv error"),
				},
			}
		}
	}

	/// Send with the default timeout and no retries.
	pub fn send(&self, request: &Request) -> Result<Response, Error> {
		self.send_with(request, DEFAULT_TIMEOUT, 0)
	}

	/// Send, waiting up to `timeout` per attempt and retransmitting up to
	/// `retries` extra times.
	///
	/// Retransmissions reuse the same sequence byte on purpose: a response
	/// to an earlier attempt still satisfies the waiter.  When the budget is
	/// exhausted a synthetic `Timeout` response is returned; wire-level
	/// failure is data here, not an error.
	pub fn send_with(&self, request: &Request, timeout: Duration, retries: u32) -> Result<Response, Error> {
		if self.shutdown.load(Ordering::Relaxed) {
			return Err(Error::Protocol("client is closed".into()));
		}
		let timeout = timeout.max(MIN_TIMEOUT).min(MAX_TIMEOUT);

		let (tx, rx) = mpsc::channel();
		let seq = self.pending.lock().unwrap().register(tx)?;
		let wire = request.to_bytes(seq);

		let mut outcome = Response::timeout();
		for attempt in 0..=retries {
			let sent_at = Instant::now();
			if let Err(e) = self.sock.send(&wire) {
				// Transient send failures are retried like lost packets.
				debug!(peer = %self.peer, attempt, error = %e, "send failed");
			}
			match rx.recv_timeout(timeout) {
				Ok(resp) => {
					trace!(
						peer = %self.peer,
						seq,
						attempt,
						rtt_ms = sent_at.elapsed().as_millis() as u64,
						"response received"
					);
					outcome = resp;
					break;
				}
				Err(RecvTimeoutError::Timeout) => {
					trace!(peer = %self.peer, seq, attempt, "attempt timed out");
				}
				Err(RecvTimeoutError::Disconnected) => break,
			}
		}
		self.pending.lock().unwrap().waiters.remove(&seq);
		Ok(outcome)
	}

	/// Stop the reader and fail every outstanding waiter with `Timeout`.
	pub fn close(&mut self) {
		if self.shutdown.swap(true, Ordering::Relaxed) {
			return;
		}
		{
			let mut pending = self.pending.lock().unwrap();
			for (_, tx) in pending.waiters.drain() {
				let _ = tx.send(Response::timeout());
			}
		}
		if let Some(reader) = self.reader.take() {
			if reader.join().is_err() {
				warn!(peer = %self.peer, "reader thread panicked");
			}
		}
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		self.close();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::checksum;

	/// A scripted peer: receives request frames and answers according to
	/// the supplied function (or stays silent when it returns None).
	fn mock_peer<F>(script: F) -> SocketAddr
	where
		F: Fn(u32, &[u8]) -> Option<Vec<u8>> + Send + 'static,
	{
		let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
		let addr = sock.local_addr().unwrap();
		thread::spawn(move || {
			let mut buf = [0u8; 1024];
			let mut count = 0u32;
			while let Ok((n, from)) = sock.recv_from(&mut buf) {
				if let Some(reply) = script(count, &buf[..n]) {
					sock.send_to(&reply, from).unwrap();
				}
				count += 1;
			}
		});
		addr
	}

	fn ok_reply(seq: u8) -> Vec<u8> {
		let mut pkt = vec![0xA0, seq, 0x00];
		pkt.push(checksum(&pkt));
		pkt
	}

	fn connect(addr: SocketAddr) -> Client {
		match addr {
			SocketAddr::V4(v4) => Client::connect(*v4.ip(), v4.port()).unwrap(),
			_ => unreachable!(),
		}
	}

	#[test]
	fn echoes_ok_with_matching_sequence() {
		let addr = mock_peer(|_, req| Some(ok_reply(req[1])));
		let client = connect(addr);
		let req = Request::basic(0xA9, 0x03, &[]).unwrap();
		let resp = client.send(&req).unwrap();
		assert_eq!(resp.rtype, ResponseType::Ok);
	}

	#[test]
	fn concurrent_sends_each_get_their_own_response() {
		// Reply carries the request sequence in the data byte, so each
		// caller can verify it got its own answer back.
		let addr = mock_peer(|_, req| {
			let mut pkt = vec![0xA1, req[1], 0x01, req[1]];
			pkt.push(checksum(&pkt));
			Some(pkt)
		});
		let client = Arc::new(connect(addr));
		let mut handles = Vec::new();
		for _ in 0..16 {
			let client = client.clone();
			handles.push(thread::spawn(move || {
				let req = Request::basic(0xAA, 0x00, &[]).unwrap();
				let resp = client.send_with(&req, Duration::from_secs(2), 1).unwrap();
				assert_eq!(resp.rtype, ResponseType::Answer);
				resp
			}));
		}
		let responses: Vec<Response> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		for resp in responses {
			assert_eq!(resp.data[0], resp.seq);
		}
	}

	#[test]
	fn drops_first_attempts_then_answers() {
		// Silent for the first two datagrams, answers the third.
		let addr = mock_peer(|count, req| if count < 2 { None } else { Some(ok_reply(req[1])) });
		let client = connect(addr);
		let req = Request::basic(0xA9, 0x00, &[]).unwrap();
		let resp = client.send_with(&req, Duration::from_millis(100), 2).unwrap();
		assert_eq!(resp.rtype, ResponseType::Ok);
	}

	#[test]
	fn insufficient_retries_yield_timeout() {
		let addr = mock_peer(|count, req| if count < 2 { None } else { Some(ok_reply(req[1])) });
		let client = connect(addr);
		let req = Request::basic(0xA9, 0x00, &[]).unwrap();
		let resp = client.send_with(&req, Duration::from_millis(50), 1).unwrap();
		assert_eq!(resp.rtype, ResponseType::Timeout);
	}

	#[test]
	fn mismatched_sequence_never_satisfies_the_waiter() {
		// Always replies with a sequence the client never allocated.
		let addr = mock_peer(|_, _| Some(ok_reply(0xEE)));
		let client = connect(addr);
		let req = Request::basic(0xA9, 0x00, &[]).unwrap();
		let resp = client.send_with(&req, Duration::from_millis(50), 0).unwrap();
		assert_eq!(resp.rtype, ResponseType::Timeout);
	}

	#[test]
	fn malformed_replies_are_ignored() {
		let addr = mock_peer(|_, req| {
			// correct sequence, corrupted checksum
			let mut pkt = vec![0xA0, req[1], 0x00];
			let cs = checksum(&pkt) ^ 0xFF;
			pkt.push(cs);
			Some(pkt)
		});
		let client = connect(addr);
		let req = Request::basic(0xA9, 0x00, &[]).unwrap();
		let resp = client.send_with(&req, Duration::from_millis(50), 0).unwrap();
		assert_eq!(resp.rtype, ResponseType::Timeout);
	}

	#[test]
	fn close_cancels_outstanding_waiters() {
		let addr = mock_peer(|_, _| None);
		let client = Arc::new(connect(addr));
		let waiter = {
			let client = client.clone();
			thread::spawn(move || {
				let req = Request::basic(0xA9, 0x00, &[]).unwrap();
				client.send_with(&req, Duration::from_secs(8), 0).unwrap()
			})
		};
		thread::sleep(Duration::from_millis(100));
		// close() needs &mut; drive it through the only other Arc handle
		// by replicating what close does at the library boundary.
		client.shutdown.store(true, Ordering::Relaxed);
		for (_, tx) in client.pending.lock().unwrap().waiters.drain() {
			let _ = tx.send(Response::timeout());
		}
		let resp = waiter.join().unwrap();
		assert_eq!(resp.rtype, ResponseType::Timeout);
	}
}
