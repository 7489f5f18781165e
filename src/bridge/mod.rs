//! UDP <-> radio bridge
//!
//! Two pump loops share one [`LinkLayer`] behind a mutex. The outbound
//! pump blocks on the socket and transmits each datagram as one radio
//! frame; the inbound pump listens on the radio in bounded slices and
//! forwards each payload to the last UDP peer heard from. The peer
//! address is learned, not configured: whoever sent the most recent
//! datagram receives the radio traffic.
//!
//! A radio fault in either pump triggers a restart that reapplies the
//! modem configuration; the loops themselves keep running.

pub mod socket;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::bridge::{LISTEN_MS, PUMP_YIELD_US, RX_SLICE_MS, UDP_BUFFER};
use crate::link::layer::{LinkError, LinkLayer};
use crate::radio::traits::Radio;
use socket::DatagramSocket;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}

/// Pump loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Overall budget for one inbound listen slice, in milliseconds
    pub rx_slice_ms: u32,
    /// Ceiling on a single listen attempt within a slice, in
    /// milliseconds; the radio lock is held for at most this long
    pub listen_ms: u32,
    /// Pause between listen attempts while the radio lock is free
    pub pump_yield: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rx_slice_ms: RX_SLICE_MS,
            listen_ms: LISTEN_MS,
            pump_yield: Duration::from_micros(PUMP_YIELD_US),
        }
    }
}

/// Bidirectional UDP <-> radio forwarder
pub struct Bridge<R: Radio, S: DatagramSocket> {
    socket: S,
    link: Mutex<LinkLayer<R>>,
    peer: Mutex<Option<SocketAddr>>,
    stop: AtomicBool,
    config: BridgeConfig,
}

impl<R: Radio, S: DatagramSocket> Bridge<R, S> {
    pub fn new(socket: S, link: LinkLayer<R>) -> Self {
        Self::with_config(socket, link, BridgeConfig::default())
    }

    pub fn with_config(socket: S, link: LinkLayer<R>, config: BridgeConfig) -> Self {
        Self {
            socket,
            link: Mutex::new(link),
            peer: Mutex::new(None),
            stop: AtomicBool::new(false),
            config,
        }
    }

    /// Ask both pumps to wind down after their current iteration
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// The UDP peer radio traffic is currently forwarded to
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    fn learn_peer(&self, addr: SocketAddr) {
        let mut peer = self.peer.lock();
        if *peer != Some(addr) {
            info!("forwarding radio traffic to {}", addr);
            *peer = Some(addr);
        }
    }

    /// One outbound iteration: wait for a datagram, transmit it.
    ///
    /// Socket read timeouts are a quiet no-op so the loop can observe
    /// the stop flag. A radio TX timeout drops the datagram; there is
    /// no queueing at this layer.
    pub fn pump_outbound_once(&self) -> Result<(), BridgeError> {
        let mut buf = [0u8; UDP_BUFFER];
        let (count, from) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };
        if count == 0 {
            return Ok(());
        }
        self.learn_peer(from);
        debug!("udp rx {} bytes from {}", count, from);

        let mut link = self.link.lock();
        match link.transmit(&buf[..count]) {
            Ok(()) => {}
            Err(LinkError::Timeout) => warn!("radio tx timed out, datagram dropped"),
            Err(LinkError::PayloadTooLong) => {
                warn!("datagram of {} bytes exceeds one frame, dropped", count)
            }
            Err(LinkError::Fault) => self.recover(&mut link),
        }
        Ok(())
    }

    /// One inbound slice: poll the radio in short listen attempts
    /// until a payload arrives or the slice budget runs out. The radio
    /// lock covers one attempt at a time and is released, with a short
    /// yield, between attempts, so a pending outbound datagram waits
    /// for at most one attempt rather than a whole slice.
    pub fn pump_inbound_once(&self) -> Result<(), BridgeError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(self.config.rx_slice_ms));
        loop {
            let attempt = {
                let mut link = self.link.lock();
                link.try_receive(self.config.listen_ms)
            };
            match attempt {
                Ok(Some(payload)) => {
                    match self.peer() {
                        Some(addr) => {
                            self.socket.send_to(&payload, addr)?;
                            debug!("udp tx {} bytes to {}", payload.len(), addr);
                        }
                        None => warn!("radio frame arrived before any udp peer, dropped"),
                    }
                    return Ok(());
                }
                Ok(None) => {}
                Err(LinkError::Fault) => {
                    self.recover(&mut self.link.lock());
                    return Ok(());
                }
                Err(_) => return Ok(()),
            }
            if self.stop.load(Ordering::Relaxed) || Instant::now() >= deadline {
                return Ok(());
            }
            thread::sleep(self.config.pump_yield);
        }
    }

    fn recover(&self, link: &mut LinkLayer<R>) {
        error!("radio fault, restarting modem");
        if let Err(e) = link.radio_mut().restart() {
            error!("modem restart failed: {}", e);
        }
    }
}

impl<R: Radio + Send, S: DatagramSocket + Sync> Bridge<R, S> {
    /// Run both pumps until [`Bridge::shutdown`] is called.
    ///
    /// Announces with a hello burst first so the peer resets its
    /// sequence tracking. Pump errors are logged and the loop carries
    /// on; only the stop flag ends it.
    pub fn run(&self) {
        info!("bridge running");
        if let Err(e) = self.link.lock().send_hello() {
            warn!("hello burst failed: {}", e);
        }
        thread::scope(|scope| {
            scope.spawn(|| {
                while !self.stop.load(Ordering::Relaxed) {
                    if let Err(e) = self.pump_outbound_once() {
                        warn!("outbound pump: {}", e);
                    }
                }
                debug!("outbound pump stopped");
            });
            scope.spawn(|| {
                while !self.stop.load(Ordering::Relaxed) {
                    if let Err(e) = self.pump_inbound_once() {
                        warn!("inbound pump: {}", e);
                    }
                    thread::sleep(self.config.pump_yield);
                }
                debug!("inbound pump stopped");
            });
        });
        info!("bridge stopped");
    }
}
