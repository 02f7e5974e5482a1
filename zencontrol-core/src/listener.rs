use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use get_if_addrs::{get_if_addrs, IfAddr};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::frame::EventFrame;

/// Multicast group controllers emit TPI events to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 90, 67);
pub const MULTICAST_PORT: u16 = 6969;

const READ_POLL: Duration = Duration::from_millis(250);

/// The local IPv4 address a controller should be told to unicast to.
/// First non-loopback interface wins.
pub fn local_ipv4() -> Option<Ipv4Addr> {
	let ifaces = get_if_addrs().ok()?;
	ifaces.into_iter().find_map(|iface| match iface.addr {
		IfAddr::V4(v4) if !v4.ip.is_loopback() => Some(v4.ip),
		_ => None,
	})
}

/// One event socket per process, shared by all controllers.
///
/// In multicast mode the socket joins the TPI group on every usable
/// interface; in unicast mode it binds a caller-chosen endpoint which the
/// controllers must be configured to send to.  Datagrams that fail
/// validation are counted and dropped; they never surface to consumers.
pub struct Listener {
	local_addr: SocketAddr,
	unicast: bool,
	rx: Receiver<EventFrame>,
	shutdown: Arc<AtomicBool>,
	dropped: Arc<AtomicU64>,
	worker: Option<JoinHandle<()>>,
}

impl Listener {
	/// Join the TPI multicast group and start receiving.
	pub fn multicast() -> Result<Listener, Error> {
		let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
		sock.set_reuse_address(true)?;
		let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT));
		sock.bind(&bind_addr.into())?;

		let mut joined = 0;
		if let Ok(ifaces) = get_if_addrs() {
			for iface in ifaces {
				if let IfAddr::V4(v4) = iface.addr {
					if v4.ip.is_loopback() {
						continue;
					}
					match sock.join_multicast_v4(&MULTICAST_GROUP, &v4.ip) {
						Ok(()) => {
							debug!(interface = %v4.ip, group = %MULTICAST_GROUP, "joined multicast group");
							joined += 1;
						}
						Err(e) => warn!(interface = %v4.ip, error = %e, "multicast join failed"),
					}
				}
			}
		}
		if joined == 0 {
			// No usable interface found; let the kernel pick one.
			sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
		}

		info!(group = %MULTICAST_GROUP, port = MULTICAST_PORT, "listening for multicast events");
		Listener::start(sock.into(), false)
	}

	/// Bind a unicast endpoint.  Pass port 0 to let the kernel choose, then
	/// read it back with [Listener::local_addr] before configuring the
	/// controllers.
	pub fn unicast(ip: Ipv4Addr, port: u16) -> Result<Listener, Error> {
		let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
		sock.set_reuse_address(true)?;
		let bind_addr = SocketAddr::from((ip, port));
		sock.bind(&bind_addr.into())?;
		let listener = Listener::start(sock.into(), true)?;
		info!(addr = %listener.local_addr(), "listening for unicast events");
		Ok(listener)
	}

	fn start(sock: UdpSocket, unicast: bool) -> Result<Listener, Error> {
		sock.set_read_timeout(Some(READ_POLL))?;
		let local_addr = sock.local_addr()?;
		let shutdown = Arc::new(AtomicBool::new(false));
		let dropped = Arc::new(AtomicU64::new(0));
		let (tx, rx) = mpsc::channel();

		let worker_shutdown = shutdown.clone();
		let worker_dropped = dropped.clone();
		let worker = thread::spawn(move || Self::worker(sock, tx, worker_shutdown, worker_dropped));

		Ok(Listener { local_addr, unicast, rx, shutdown, dropped, worker: Some(worker) })
	}

	fn worker(sock: UdpSocket, tx: Sender<EventFrame>, shutdown: Arc<AtomicBool>, dropped: Arc<AtomicU64>) {
		let mut buf = [0u8; 1024];
		loop {
			if shutdown.load(Ordering::Relaxed) {
				break;
			}
			match sock.recv_from(&mut buf) {
				Ok((n, from)) => match EventFrame::parse(&buf[..n], from) {
					Some(event) => {
						if tx.send(event).is_err() {
							break;
						}
					}
					None => {
						dropped.fetch_add(1, Ordering::Relaxed);
						debug!(%from, len = n, "dropping invalid event datagram");
					}
				},
				Err(e) => match e.kind() {
					std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => continue,
					_ => {
						if !shutdown.load(Ordering::Relaxed) {
							warn!(error = %e, "event socket recv error");
						}
						break;
					}
				},
			}
		}
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn is_unicast(&self) -> bool {
		self.unicast
	}

	/// Datagrams received and discarded as malformed since startup.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Blocking iterator over incoming events.  Infinite until the listener
	/// is closed, at which point it drains buffered events and ends.
	pub fn events(&self) -> Events<'_> {
		Events { rx: &self.rx }
	}

	/// Receive one event, or `None` if nothing arrives within `timeout`.
	pub fn next_event(&self, timeout: Duration) -> Option<EventFrame> {
		self.rx.recv_timeout(timeout).ok()
	}

	pub(crate) fn stop_signal(&self) -> Arc<AtomicBool> {
		self.shutdown.clone()
	}

	pub fn close(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(worker) = self.worker.take() {
			let _ = worker.join();
		}
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		self.close();
	}
}

/// See [Listener::events].
pub struct Events<'a> {
	rx: &'a Receiver<EventFrame>,
}

impl<'a> Iterator for Events<'a> {
	type Item = EventFrame;

	fn next(&mut self) -> Option<EventFrame> {
		self.rx.recv().ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::checksum;

	fn event_packet(target: u16, code: u8, payload: &[u8]) -> Vec<u8> {
		let mut pkt = vec![0x5A, 0x43, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
		pkt.extend_from_slice(&target.to_be_bytes());
		pkt.push(code);
		pkt.push(payload.len() as u8);
		pkt.extend_from_slice(payload);
		pkt.push(checksum(&pkt));
		pkt
	}

	#[test]
	fn unicast_listener_yields_valid_events_and_counts_garbage() {
		let mut listener = Listener::unicast(Ipv4Addr::LOCALHOST, 0).unwrap();
		let target = listener.local_addr();

		let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
		sender.send_to(&event_packet(10, 0x0B, &[0xFE, 0x80]), target).unwrap();
		sender.send_to(b"not an event", target).unwrap();
		sender.send_to(&event_packet(66, 0x05, &[0x03]), target).unwrap();

		let first = listener.next_event(Duration::from_secs(2)).unwrap();
		assert_eq!((first.target, first.code), (10, 0x0B));
		assert_eq!(first.payload, vec![0xFE, 0x80]);

		let second = listener.next_event(Duration::from_secs(2)).unwrap();
		assert_eq!((second.target, second.code), (66, 0x05));

		// give the worker a beat to account the garbage datagram
		for _ in 0..20 {
			if listener.dropped() == 1 {
				break;
			}
			thread::sleep(Duration::from_millis(50));
		}
		assert_eq!(listener.dropped(), 1);

		listener.close();
		assert!(listener.events().next().is_none());
	}

	#[test]
	fn close_ends_the_event_stream() {
		let mut listener = Listener::unicast(Ipv4Addr::LOCALHOST, 0).unwrap();
		let signal = listener.stop_signal();
		listener.close();
		assert!(signal.load(Ordering::Relaxed));
		assert!(listener.events().next().is_none());
	}
}
