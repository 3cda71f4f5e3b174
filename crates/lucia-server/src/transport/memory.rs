//! In-process transport used by connection-loop tests.

use lucia_core::{FrameTransport, LuciaError, LuciaResult};
use tokio::sync::mpsc;

/// Server half: handed to a `Connection`.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Client half: what the test drives.
pub struct MemoryPeer {
    pub tx: mpsc::UnboundedSender<Vec<u8>>,
    pub rx: mpsc::UnboundedReceiver<String>,
}

pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            inbound: server_rx,
            outbound: server_tx,
        },
        MemoryPeer {
            tx: client_tx,
            rx: client_rx,
        },
    )
}

impl FrameTransport for MemoryTransport {
    async fn send_text(&mut self, frame: String) -> LuciaResult<()> {
        self.outbound
            .send(frame)
            .map_err(|_| LuciaError::Transport("memory peer dropped".into()))
    }

    async fn recv_frame(&mut self) -> LuciaResult<Option<Vec<u8>>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> LuciaResult<()> {
        self.inbound.close();
        Ok(())
    }

    fn peer(&self) -> String {
        "memory".to_string()
    }
}
