//! Framed bus over a byte stream pair
//!
//! Used on both ends of a worker link: the supervisor bridges a child's
//! stdout/stdin, the worker bridges its own stdin/stdout.

use protocol::{read_frame, write_frame, BusMessage};
use telemetry::LogEmoji;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct FrameBridge {
    /// Messages written to the peer, in send order
    pub outbound: mpsc::UnboundedSender<BusMessage>,
    /// Messages read from the peer; closes on EOF or a bad frame
    pub inbound: mpsc::UnboundedReceiver<BusMessage>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl FrameBridge {
    pub fn spawn<R, W>(label: String, mut reader: R, mut writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<BusMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let read_label = label.clone();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(msg)) => {
                        if inbound_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("{}: end of stream", read_label);
                        break;
                    }
                    Err(e) => {
                        warn!("{} {}: dropping link after bad frame: {}", LogEmoji::ERROR, read_label, e);
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    debug!("{}: peer closed ({}), discarding further messages", label, e);
                    break;
                }
            }
        });

        Self {
            outbound,
            inbound,
            reader,
            writer,
        }
    }
}
