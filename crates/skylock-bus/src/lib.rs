//! UDP message bus for inter-process communication on the companion computer.
//!
//! Typed, lossy, topic-addressed pub/sub. Each producer owns a fixed UDP
//! port ([`ports`]); consumers register with the producers they need by
//! sending a subscription frame to that port. Delivery is at-most-once:
//! a full buffer or an unreachable subscriber drops the datagram, never
//! blocks the publisher. The freshest observation is always the relevant
//! one in this system, so stale data is dropped rather than queued.

pub mod ports;
pub mod topics;

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use skylock_proto::types::BusMessage;

/// Subscriber registrations expire if not refreshed within this window.
const REGISTRATION_TTL: Duration = Duration::from_secs(5);
/// Subscribers re-announce their topics at this interval.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bind bus socket: {0}")]
    Bind(#[from] std::io::Error),
    #[error("serialize bus frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything that crosses a bus socket. The `kind` tag makes each datagram
/// self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum Frame {
    Sub { topic: String },
    Unsub { topic: String },
    Data { topic: String, msg: BusMessage },
}

/// Publishes typed messages to a topic from a fixed, producer-owned port.
///
/// Subscribers announce themselves with `Sub` frames; `publish` fans the
/// serialized message out to every live registration for the topic. Send
/// failures are transient by policy: logged and dropped.
pub struct Publisher {
    socket: UdpSocket,
    // topic -> subscriber -> last refresh
    registry: HashMap<String, HashMap<SocketAddr, Instant>>,
    port: u16,
}

impl Publisher {
    pub fn new(port: u16) -> Result<Self, BusError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        let port = socket.local_addr()?.port();
        info!("bus: publisher bound on port {}", port);
        Ok(Self {
            socket,
            registry: HashMap::new(),
            port,
        })
    }

    /// The bound port; matches the requested one unless 0 was asked for.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drain pending subscription frames and expire stale registrations.
    /// Called implicitly by `publish`; nodes that publish only sporadically
    /// call this from their tick instead.
    pub fn poll(&mut self) {
        let mut buf = [0u8; 1024];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("bus: publisher recv failed: {}", e);
                    break;
                }
            };
            match serde_json::from_slice::<Frame>(&buf[..len]) {
                Ok(Frame::Sub { topic }) => {
                    let entry = self.registry.entry(topic).or_default();
                    if entry.insert(from, Instant::now()).is_none() {
                        debug!("bus: subscriber {} registered", from);
                    }
                }
                Ok(Frame::Unsub { topic }) => {
                    if let Some(subs) = self.registry.get_mut(&topic) {
                        subs.remove(&from);
                    }
                }
                Ok(Frame::Data { .. }) => {
                    debug!("bus: ignoring data frame on publisher port");
                }
                Err(e) => warn!("bus: bad control frame from {}: {}", from, e),
            }
        }

        for subs in self.registry.values_mut() {
            subs.retain(|_, last| last.elapsed() < REGISTRATION_TTL);
        }
    }

    /// Serialize and fan out. Never blocks; a failed or oversized send is
    /// logged at warn and dropped.
    pub fn publish(&mut self, topic: &str, msg: &BusMessage) {
        self.poll();

        let frame = Frame::Data {
            topic: topic.to_string(),
            msg: msg.clone(),
        };
        let payload = match serde_json::to_vec(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("bus: failed to serialize {}: {}", topic, e);
                return;
            }
        };
        if payload.len() > MAX_DATAGRAM {
            warn!("bus: {} payload too large ({} bytes), dropped", topic, payload.len());
            return;
        }

        let mut targets: Vec<SocketAddr> = Vec::new();
        for key in [topic, topics::ALL] {
            if let Some(subs) = self.registry.get(key) {
                targets.extend(subs.keys().copied());
            }
        }
        targets.sort();
        targets.dedup();

        for addr in targets {
            match self.socket.send_to(&payload, addr) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // Outbound buffer full: drop, the next tick carries
                    // fresher data anyway.
                    debug!("bus: send buffer full, dropped {} to {}", topic, addr);
                }
                Err(e) => warn!("bus: send {} to {} failed: {}", topic, addr, e),
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

/// Receives messages from one producer port with non-blocking receive.
pub struct Subscriber {
    socket: UdpSocket,
    publisher: SocketAddr,
    topics: HashSet<String>,
    last_refresh: Instant,
}

impl Subscriber {
    /// `host`/`port` address the producer to pull from.
    pub fn new(host: &str, port: u16) -> Result<Self, BusError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        let publisher = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, format!("{e}")))?;
        info!("bus: subscriber connected to {}", publisher);
        Ok(Self {
            socket,
            publisher,
            topics: HashSet::new(),
            last_refresh: Instant::now(),
        })
    }

    /// Idempotent topic registration.
    pub fn subscribe(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
        self.send_control(&Frame::Sub { topic: topic.to_string() });
        debug!("bus: subscribed to {}", topic);
    }

    pub fn subscribe_all(&mut self) {
        self.subscribe(topics::ALL);
    }

    pub fn unsubscribe(&mut self, topic: &str) {
        self.topics.remove(topic);
        self.send_control(&Frame::Unsub { topic: topic.to_string() });
    }

    /// Receive one message, waiting up to `timeout`. A zero timeout is a
    /// pure non-blocking poll, the only form the node loops use.
    pub fn receive(&mut self, timeout: Duration) -> Option<(String, BusMessage)> {
        self.refresh_registrations();

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _from)) => match serde_json::from_slice::<Frame>(&buf[..len]) {
                    Ok(Frame::Data { topic, msg }) => {
                        if self.wants(&topic) {
                            return Some((topic, msg));
                        }
                        // Not subscribed (late unsubscribe): discard.
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("bus: undecodable datagram: {}", e);
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    warn!("bus: receive failed: {}", e);
                    return None;
                }
            }
        }
    }

    /// Drain everything pending and keep only the freshest message per
    /// topic. This is how every node consumes its inputs each tick.
    pub fn drain_latest(&mut self) -> HashMap<String, BusMessage> {
        let mut latest = HashMap::new();
        while let Some((topic, msg)) = self.receive(Duration::ZERO) {
            latest.insert(topic, msg);
        }
        latest
    }

    fn wants(&self, topic: &str) -> bool {
        self.topics.contains(topics::ALL) || self.topics.contains(topic)
    }

    /// Registrations on the producer expire; re-announce periodically so a
    /// restarted publisher picks us back up.
    fn refresh_registrations(&mut self) {
        if self.last_refresh.elapsed() < REFRESH_INTERVAL {
            return;
        }
        self.last_refresh = Instant::now();
        for topic in self.topics.clone() {
            self.send_control(&Frame::Sub { topic });
        }
    }

    fn send_control(&self, frame: &Frame) {
        let payload = match serde_json::to_vec(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("bus: failed to serialize control frame: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&payload, self.publisher) {
            warn!("bus: control send to {} failed: {}", self.publisher, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylock_proto::types::{Setpoint, UserCommand};

    fn settle() {
        std::thread::sleep(Duration::from_millis(30));
    }

    fn recv(sub: &mut Subscriber) -> Option<(String, BusMessage)> {
        sub.receive(Duration::from_millis(500))
    }

    #[test]
    fn publish_reaches_subscriber() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe(topics::SETPOINTS);
        settle();

        let sp = Setpoint::neutral();
        publisher.publish(topics::SETPOINTS, &BusMessage::Setpoint(sp));

        let (topic, msg) = recv(&mut sub).expect("message should arrive");
        assert_eq!(topic, topics::SETPOINTS);
        assert_eq!(msg, BusMessage::Setpoint(sp));
    }

    #[test]
    fn unsubscribed_topics_are_not_delivered() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe(topics::ERRORS);
        settle();

        publisher.publish(
            topics::SETPOINTS,
            &BusMessage::Setpoint(Setpoint::neutral()),
        );
        assert!(sub.receive(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn subscribe_all_sees_every_topic() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe_all();
        settle();

        publisher.publish(topics::QGC_CMDS, &BusMessage::Command(UserCommand::ClearLock));
        let (topic, _) = recv(&mut sub).expect("wildcard should receive");
        assert_eq!(topic, topics::QGC_CMDS);
    }

    #[test]
    fn subscription_is_idempotent() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe(topics::ERRORS);
        sub.subscribe(topics::ERRORS);
        settle();
        publisher.poll();
        assert_eq!(publisher.subscriber_count(topics::ERRORS), 1);
    }

    #[test]
    fn two_subscribers_both_receive() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub_a = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        let mut sub_b = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub_a.subscribe(topics::ERRORS);
        sub_b.subscribe(topics::ERRORS);
        settle();

        let msg = BusMessage::Command(UserCommand::StartTracking);
        publisher.publish(topics::ERRORS, &msg);

        assert_eq!(recv(&mut sub_a).map(|(_, m)| m), Some(msg.clone()));
        assert_eq!(recv(&mut sub_b).map(|(_, m)| m), Some(msg));
    }

    #[test]
    fn drain_latest_keeps_freshest_only() {
        let mut publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe(topics::SETPOINTS);
        settle();

        for roll in [1.0, 2.0, 3.0] {
            publisher.publish(
                topics::SETPOINTS,
                &BusMessage::Setpoint(Setpoint::new(roll, 0.0, 0.0, 0.0)),
            );
        }
        settle();

        let latest = sub.drain_latest();
        match latest.get(topics::SETPOINTS) {
            Some(BusMessage::Setpoint(sp)) => assert_eq!(sp.roll_deg, 3.0),
            other => panic!("unexpected drain result: {:?}", other),
        }
    }

    #[test]
    fn receive_times_out_without_traffic() {
        let publisher = Publisher::new(0).unwrap();
        let mut sub = Subscriber::new("127.0.0.1", publisher.port()).unwrap();
        sub.subscribe(topics::TRACKS);
        let start = Instant::now();
        assert!(sub.receive(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
