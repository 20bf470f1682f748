#![allow(dead_code)]
//! CAN bus transport (spec §4.1, §6 "Charger wire protocol"). The charger
//! polling cycle writes commands and reads telemetry over 29-bit extended
//! CAN IDs; both framings observe a minimum 5 ms inter-frame gap so the
//! PSU's receive buffer is never overrun.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const MIN_INTER_FRAME_GAP: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum CanError {
    #[error("CAN bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("CAN write timed out")]
    WriteTimeout,
    #[error("CAN read timed out")]
    ReadTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub extended: bool,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn extended(id: u32, data: Vec<u8>) -> Self {
        Self { id, extended: true, data }
    }
}

#[async_trait]
pub trait CanBus: Send + Sync {
    async fn send_frame(&self, frame: CanFrame) -> Result<(), CanError>;
    async fn poll_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, CanError>;
}

/// In-process loopback bus driven entirely by test code, standing in for
/// the physical PSU on the other end of the wire.
pub struct SimulatedCanBus {
    inbox: Arc<Mutex<VecDeque<CanFrame>>>,
    sent: Arc<Mutex<Vec<CanFrame>>>,
    last_send: Arc<Mutex<Option<Instant>>>,
}

impl SimulatedCanBus {
    pub fn new() -> Self {
        Self {
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            last_send: Arc::new(Mutex::new(None)),
        }
    }

    /// Test hook: queue a frame as if it had just arrived from the PSU.
    pub async fn inject(&self, frame: CanFrame) {
        self.inbox.lock().await.push_back(frame);
    }

    pub async fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().await.clone()
    }
}

impl Default for SimulatedCanBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanBus for SimulatedCanBus {
    async fn send_frame(&self, frame: CanFrame) -> Result<(), CanError> {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            if prev.elapsed() < MIN_INTER_FRAME_GAP {
                tokio::time::sleep(MIN_INTER_FRAME_GAP - prev.elapsed()).await;
            }
        }
        *last = Some(Instant::now());
        self.sent.lock().await.push(frame);
        Ok(())
    }

    async fn poll_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, CanError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.inbox.lock().await.pop_front() {
                return Ok(Some(frame));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(feature = "real")]
pub mod real {
    use super::*;
    use socketcan::tokio::CanSocket;
    use socketcan::{CanFrame as SocketCanFrame, EmbeddedFrame, ExtendedId, Frame, Id};

    /// SocketCAN-backed bus for a Linux CAN interface (e.g. `can0`).
    pub struct SocketCanBus {
        socket: Mutex<CanSocket>,
        last_send: Arc<Mutex<Option<Instant>>>,
    }

    impl SocketCanBus {
        pub fn open(iface: &str) -> Result<Self, CanError> {
            let socket = CanSocket::open(iface).map_err(|e| CanError::BusUnavailable(e.to_string()))?;
            Ok(Self { socket: Mutex::new(socket), last_send: Arc::new(Mutex::new(None)) })
        }
    }

    #[async_trait]
    impl CanBus for SocketCanBus {
        async fn send_frame(&self, frame: CanFrame) -> Result<(), CanError> {
            let mut last = self.last_send.lock().await;
            if let Some(prev) = *last {
                if prev.elapsed() < MIN_INTER_FRAME_GAP {
                    tokio::time::sleep(MIN_INTER_FRAME_GAP - prev.elapsed()).await;
                }
            }
            let id = ExtendedId::new(frame.id).ok_or_else(|| CanError::BusUnavailable("invalid CAN id".into()))?;
            let raw = SocketCanFrame::new(Id::Extended(id), &frame.data)
                .ok_or_else(|| CanError::BusUnavailable("invalid CAN payload".into()))?;
            self.socket.lock().await.write_frame(&raw).await.map_err(|_| CanError::WriteTimeout)?;
            *last = Some(Instant::now());
            Ok(())
        }

        async fn poll_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, CanError> {
            let fut = self.socket.lock().await.read_frame();
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(raw)) => Ok(Some(CanFrame {
                    id: raw.raw_id() & socketcan::id::EFF_MASK,
                    extended: raw.is_extended(),
                    data: raw.data().to_vec(),
                })),
                Ok(Err(_)) => Err(CanError::ReadTimeout),
                Err(_) => Ok(None),
            }
        }
    }
}
