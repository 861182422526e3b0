//! Loopback Transport - an in-process stand-in for the external session
//! transport.
//!
//! Accepts every listen and connect request, collects transmitted
//! messages and verifies their checksums. Used by the binaries, benches
//! and tests to drive order entry without a network.

use crate::message::{message_checksum, MESSAGE_LEN};
use crate::session::{
    ConnectionStatus, DataWord, Notification, TransportChannels, TxError, TxMeta, TxStatus,
    FULL_WINDOW,
};

/// A message collected from order entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub meta: TxMeta,
    pub bytes: Vec<u8>,
    /// False when the carried checksum did not match the payload
    pub checksum_ok: bool,
}

/// Loopback counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub listens: u32,
    pub opens: u32,
    pub closes: u32,
    pub messages: u32,
    pub checksum_failures: u32,
    pub read_requests: u32,
}

pub struct LoopbackTransport {
    io: TransportChannels,
    accept: bool,
    next_session: u16,
    open_session: Option<u16>,
    partial: Option<(TxMeta, Vec<u8>)>,
    received: Vec<ReceivedMessage>,
    /// Keep collected messages (off for long benchmark runs)
    retain: bool,
    stats: LoopbackStats,
}

impl LoopbackTransport {
    pub fn new(io: TransportChannels) -> Self {
        Self {
            io,
            accept: true,
            next_session: 1,
            open_session: None,
            partial: None,
            received: Vec::new(),
            retain: true,
            stats: LoopbackStats::default(),
        }
    }

    /// Refuse subsequent connection requests.
    pub fn refuse_connections(&mut self, refuse: bool) {
        self.accept = !refuse;
    }

    /// Count messages without keeping them.
    pub fn discard_messages(&mut self, discard: bool) {
        self.retain = !discard;
    }

    /// Service every pending request and drain the transmit queues.
    pub fn poll(&mut self) -> bool {
        let mut progressed = false;

        while let Ok(port) = self.io.listen_port.pop() {
            tracing::debug!(port, "loopback listen");
            let _ = self.io.listen_status.push(true);
            self.stats.listens += 1;
            progressed = true;
        }

        while let Ok(destination) = self.io.open_connection.pop() {
            let session_id = self.next_session;
            let success = self.accept;
            if success {
                self.next_session = self.next_session.wrapping_add(1);
                self.open_session = Some(session_id);
                self.stats.opens += 1;
            }
            tracing::debug!(?destination, session_id, success, "loopback open");
            let _ = self
                .io
                .connection_status
                .push(ConnectionStatus { session_id, success });
            progressed = true;
        }

        while let Ok(session_id) = self.io.close_connection.pop() {
            if self.open_session == Some(session_id) {
                self.open_session = None;
            }
            self.stats.closes += 1;
            progressed = true;
        }

        while let Ok(_request) = self.io.read_requests.pop() {
            self.stats.read_requests += 1;
            progressed = true;
        }

        progressed |= self.collect();
        progressed
    }

    fn collect(&mut self) -> bool {
        let mut progressed = false;
        loop {
            if self.partial.is_none() {
                let Ok(meta) = self.io.tx_meta.pop() else {
                    break;
                };
                self.partial = Some((meta, Vec::with_capacity(MESSAGE_LEN)));
                progressed = true;
            }
            let Ok(word) = self.io.tx_data.pop() else {
                break;
            };
            progressed = true;
            if let Some((_, bytes)) = self.partial.as_mut() {
                bytes.extend_from_slice(&word.data.to_be_bytes());
            }
            if word.last {
                if let Some((meta, bytes)) = self.partial.take() {
                    self.finish(meta, bytes);
                }
            }
        }
        progressed
    }

    fn finish(&mut self, meta: TxMeta, bytes: Vec<u8>) {
        let checksum_ok = !meta.checksum_valid || meta.checksum == message_checksum(&bytes);
        if !checksum_ok {
            self.stats.checksum_failures += 1;
            tracing::warn!(
                session_id = meta.session_id,
                carried = meta.checksum,
                "loopback checksum mismatch"
            );
        }
        self.stats.messages += 1;
        if self.retain {
            self.received.push(ReceivedMessage {
                meta,
                bytes,
                checksum_ok,
            });
        }
    }

    /// Report a transmit status for the open session.
    pub fn report_tx_status(&mut self, space: u32, error: TxError) -> bool {
        let session_id = self.open_session.unwrap_or(0);
        self.io
            .tx_status
            .push(TxStatus {
                session_id,
                length: 0,
                space,
                error,
            })
            .is_ok()
    }

    /// Restore the full transmit window.
    pub fn reopen_window(&mut self) -> bool {
        self.report_tx_status(FULL_WINDOW, TxError::Success)
    }

    /// Announce that the peer closed the open session.
    pub fn close_from_peer(&mut self) -> bool {
        let Some(session_id) = self.open_session.take() else {
            return false;
        };
        self.io
            .notifications
            .push(Notification {
                session_id,
                closed: true,
                ..Default::default()
            })
            .is_ok()
    }

    /// Deliver an inbound payload: a notification, then meta and data.
    pub fn deliver(&mut self, payload: &[u64]) -> bool {
        let Some(session_id) = self.open_session else {
            return false;
        };
        if self.io.rx_data.slots() < payload.len() || self.io.rx_meta.is_full() {
            return false;
        }
        let _ = self.io.notifications.push(Notification {
            session_id,
            length: (payload.len() * 8) as u16,
            ..Default::default()
        });
        let _ = self.io.rx_meta.push(session_id);
        for (k, &data) in payload.iter().enumerate() {
            let _ = self.io.rx_data.push(DataWord {
                data,
                last: k + 1 == payload.len(),
            });
        }
        true
    }

    #[inline]
    pub fn open_session(&self) -> Option<u16> {
        self.open_session
    }

    pub fn received(&self) -> &[ReceivedMessage] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<ReceivedMessage> {
        std::mem::take(&mut self.received)
    }

    #[inline]
    pub fn stats(&self) -> LoopbackStats {
        self.stats
    }
}
