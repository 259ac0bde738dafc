//! Task feed client over a plain TCP connection.
//!
//! Frames are length-prefixed JSON: a `u32` big-endian byte length followed
//! by one serialized [`Frame`]. The gateway on the other side owns the row
//! store; this client only moves rows.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::client::{Subscription, TaskFeed};
use crate::row::{Availability, TaskResultRow, TaskRow};
use crate::{FeedErr, Result};

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound on a single frame, protects against a corrupt length header.
const MAX_FRAME_SIZE: usize = 64 << 20;

const TASK_CHANNEL_DEPTH: usize = 8;

/// One protocol frame, either direction.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Subscribe { device_id: String },
    Unsubscribe { device_id: String },
    Task(TaskRow),
    Result(TaskResultRow),
    SetStatus { device_id: String, availability: Availability },
    GetStatus { device_id: String },
    Status { availability: Availability },
    Pulse { device_id: String, timestamp_ms: u64 },
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Task(_) => "task",
            Frame::Result(_) => "result",
            Frame::SetStatus { .. } => "set_status",
            Frame::GetStatus { .. } => "get_status",
            Frame::Status { .. } => "status",
            Frame::Pulse { .. } => "pulse",
        }
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(tx: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame)?;
    let header = (body.len() as LenType).to_be_bytes();

    tx.write_all(&header).await?;
    tx.write_all(&body).await?;
    tx.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R>(rx: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0; LEN_TYPE_SIZE];
    rx.read_exact(&mut header).await?;
    let len = LenType::from_be_bytes(header) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FeedErr::UnexpectedFrame { got: "oversized" });
    }

    let mut body = vec![0; len];
    rx.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Task feed client speaking the frame protocol over a byte stream.
///
/// Generic over the stream halves so tests can run it over an in-memory
/// duplex link.
pub struct TcpFeed<R, W> {
    reader: Mutex<Option<R>>,
    writer: Arc<Mutex<W>>,
}

impl TcpFeed<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to a feed gateway at `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        Ok(Self::new(rx, tx))
    }
}

impl<R, W> TcpFeed<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(rx: R, tx: W) -> Self {
        Self {
            reader: Mutex::new(Some(rx)),
            writer: Arc::new(Mutex::new(tx)),
        }
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }
}

#[async_trait]
impl<R, W> TaskFeed for TcpFeed<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn subscribe(&self, device_id: &str) -> Result<Subscription> {
        let mut rx = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(FeedErr::SubscriptionTaken)?;

        self.send(&Frame::Subscribe {
            device_id: device_id.to_string(),
        })
        .await?;

        let (task_tx, task_rx) = mpsc::channel(TASK_CHANNEL_DEPTH);
        let (close_tx, mut close_rx) = oneshot::channel();

        let writer = Arc::clone(&self.writer);
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = read_frame(&mut rx) => match frame {
                        Ok(Frame::Task(row)) => {
                            if task_tx.send(row).await.is_err() {
                                break;
                            }
                        }
                        Ok(other) => {
                            warn!(kind = other.kind(); "ignoring non-task frame");
                        }
                        Err(e) => {
                            debug!("feed connection closed: {e}");
                            break;
                        }
                    },
                    _ = &mut close_rx => {
                        let mut writer = writer.lock().await;
                        let frame = Frame::Unsubscribe {
                            device_id: device_id.clone(),
                        };
                        if let Err(e) = write_frame(&mut *writer, &frame).await {
                            warn!("failed to send unsubscribe: {e}");
                        }
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(task_rx, Some(close_tx)))
    }

    async fn write_result(&self, row: &TaskResultRow) -> Result<()> {
        self.send(&Frame::Result(row.clone())).await
    }

    async fn set_availability(&self, device_id: &str, availability: Availability) -> Result<()> {
        self.send(&Frame::SetStatus {
            device_id: device_id.to_string(),
            availability,
        })
        .await
    }

    async fn load_availability(&self, device_id: &str) -> Result<Availability> {
        let mut reader = self.reader.lock().await;
        let rx = reader.as_mut().ok_or(FeedErr::SubscriptionTaken)?;

        self.send(&Frame::GetStatus {
            device_id: device_id.to_string(),
        })
        .await?;

        match read_frame(rx).await? {
            Frame::Status { availability } => Ok(availability),
            other => Err(FeedErr::UnexpectedFrame { got: other.kind() }),
        }
    }

    async fn pulse(&self, device_id: &str, timestamp_ms: u64) -> Result<()> {
        self.send(&Frame::Pulse {
            device_id: device_id.to_string(),
            timestamp_ms,
        })
        .await
    }
}
