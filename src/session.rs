//! Session layer - the interface to the external transport and the two
//! session state machines.
//!
//! The transport (a TCP offload engine, a kernel socket shim, or the
//! in-process [`crate::loopback`] stand-in) talks to order entry only
//! through the queues created by [`session_link`].

use rtrb::{Consumer, Producer, RingBuffer};

/// Transmit window reported on a fresh connection.
pub const FULL_WINDOW: u32 = 0xFFFF;

/// Mask of the 30-bit transmit space field.
pub const SPACE_MASK: u32 = (1 << 30) - 1;

/// Destination of an outbound connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IpTuple {
    /// IPv4 address, most significant byte first
    pub address: u32,
    pub port: u16,
}

/// Answer to an open-connection request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub session_id: u16,
    pub success: bool,
}

/// Transmit error codes reported by the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxError {
    #[default]
    Success = 0,
    Closed = 1,
    OutOfSpace = 2,
}

/// Transmit status feed from the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxStatus {
    pub session_id: u16,
    pub length: u16,
    /// Bytes the transport can accept (30 bits)
    pub space: u32,
    pub error: TxError,
}

/// Session event from the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Notification {
    pub session_id: u16,
    /// Bytes waiting to be read
    pub length: u16,
    pub address: u32,
    pub port: u16,
    pub opened: bool,
    pub closed: bool,
}

/// Request to deliver pending inbound bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub session_id: u16,
    pub length: u16,
}

/// Metadata preceding each transmitted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxMeta {
    pub session_id: u16,
    pub length: u16,
    pub checksum: u16,
    pub checksum_valid: bool,
}

/// One payload word, network byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataWord {
    pub data: u64,
    pub last: bool,
}

// ============================================================================
// Queues
// ============================================================================

/// Order-entry side of the session interface.
pub struct SessionChannels {
    pub listen_port: Producer<u16>,
    pub listen_status: Consumer<bool>,
    pub open_connection: Producer<IpTuple>,
    pub connection_status: Consumer<ConnectionStatus>,
    pub close_connection: Producer<u16>,
    pub tx_status: Consumer<TxStatus>,
    pub notifications: Consumer<Notification>,
    pub read_requests: Producer<ReadRequest>,
    pub rx_meta: Consumer<u16>,
    pub rx_data: Consumer<DataWord>,
    pub tx_meta: Producer<TxMeta>,
    pub tx_data: Producer<DataWord>,
}

/// Transport side of the session interface.
pub struct TransportChannels {
    pub listen_port: Consumer<u16>,
    pub listen_status: Producer<bool>,
    pub open_connection: Consumer<IpTuple>,
    pub connection_status: Producer<ConnectionStatus>,
    pub close_connection: Consumer<u16>,
    pub tx_status: Producer<TxStatus>,
    pub notifications: Producer<Notification>,
    pub read_requests: Consumer<ReadRequest>,
    pub rx_meta: Producer<u16>,
    pub rx_data: Producer<DataWord>,
    pub tx_meta: Consumer<TxMeta>,
    pub tx_data: Consumer<DataWord>,
}

/// Create the queue pairs between order entry and a transport.
///
/// Data queues get eight times `capacity` so a full message burst fits.
pub fn session_link(capacity: usize) -> (SessionChannels, TransportChannels) {
    let data_capacity = capacity.max(1) * 8;
    let (listen_port_tx, listen_port_rx) = RingBuffer::new(capacity);
    let (listen_status_tx, listen_status_rx) = RingBuffer::new(capacity);
    let (open_tx, open_rx) = RingBuffer::new(capacity);
    let (conn_status_tx, conn_status_rx) = RingBuffer::new(capacity);
    let (close_tx, close_rx) = RingBuffer::new(capacity);
    let (tx_status_tx, tx_status_rx) = RingBuffer::new(capacity);
    let (notify_tx, notify_rx) = RingBuffer::new(capacity);
    let (read_tx, read_rx) = RingBuffer::new(capacity);
    let (rx_meta_tx, rx_meta_rx) = RingBuffer::new(capacity);
    let (rx_data_tx, rx_data_rx) = RingBuffer::new(data_capacity);
    let (tx_meta_tx, tx_meta_rx) = RingBuffer::new(capacity);
    let (tx_data_tx, tx_data_rx) = RingBuffer::new(data_capacity);

    (
        SessionChannels {
            listen_port: listen_port_tx,
            listen_status: listen_status_rx,
            open_connection: open_tx,
            connection_status: conn_status_rx,
            close_connection: close_tx,
            tx_status: tx_status_rx,
            notifications: notify_rx,
            read_requests: read_tx,
            rx_meta: rx_meta_rx,
            rx_data: rx_data_rx,
            tx_meta: tx_meta_tx,
            tx_data: tx_data_tx,
        },
        TransportChannels {
            listen_port: listen_port_rx,
            listen_status: listen_status_tx,
            open_connection: open_rx,
            connection_status: conn_status_tx,
            close_connection: close_rx,
            tx_status: tx_status_tx,
            notifications: notify_tx,
            read_requests: read_rx,
            rx_meta: rx_meta_tx,
            rx_data: rx_data_tx,
            tx_meta: tx_meta_rx,
            tx_data: tx_data_rx,
        },
    )
}

// ============================================================================
// Active connection
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Idle = 0,
    InitiatingConnection = 1,
    AwaitingConnection = 2,
    Active = 3,
}

/// Latched status of the outbound session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub connected: bool,
    pub session_id: u16,
    /// Last reported length from the transmit status feed
    pub length: u16,
    /// Transmit window in bytes
    pub space: u32,
    pub error: TxError,
}

impl SessionStatus {
    /// Packed status word: connected bit 31, error bits 30:29, space 28:0.
    pub fn register(&self) -> u32 {
        ((self.connected as u32) << 31)
            | ((self.error as u32 & 0x3) << 29)
            | (self.space & 0x1FFF_FFFF)
    }
}

/// Outbound connector state machine.
#[derive(Debug, Default)]
pub struct ActiveSession {
    state: SessionState,
    status: SessionStatus,
    /// Session opened after connect was withdrawn, still to be closed
    pending_close: Option<u16>,
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// True when a message of `length` bytes may be sent now.
    #[inline]
    pub fn can_send(&self, length: usize) -> bool {
        self.state == SessionState::Active
            && self.status.connected
            && length as u64 <= self.status.space as u64
            && self.status.error == TxError::Success
    }

    /// One activation of the connector.
    pub fn step(
        &mut self,
        connect: bool,
        destination: IpTuple,
        tx_status: &mut Consumer<TxStatus>,
        open: &mut Producer<IpTuple>,
        status: &mut Consumer<ConnectionStatus>,
        close: &mut Producer<u16>,
    ) {
        if let Ok(tx) = tx_status.pop() {
            self.status.length = tx.length;
            self.status.space = tx.space & SPACE_MASK;
            self.status.error = tx.error;
        }

        if let Some(session_id) = self.pending_close {
            if close.push(session_id).is_ok() {
                tracing::info!(session_id, "stale session closed");
                self.pending_close = None;
            }
        }

        match self.state {
            SessionState::Idle => {
                if connect {
                    self.state = SessionState::InitiatingConnection;
                    self.initiate(destination, open);
                }
            }
            SessionState::InitiatingConnection => self.initiate(destination, open),
            SessionState::AwaitingConnection => match status.pop() {
                Ok(reply) if reply.success && connect => {
                    self.state = SessionState::Active;
                    self.status.connected = true;
                    self.status.session_id = reply.session_id;
                    self.status.space = FULL_WINDOW;
                    self.status.error = TxError::Success;
                    tracing::info!(session_id = reply.session_id, "session active");
                }
                Ok(reply) if reply.success => {
                    // Connect was withdrawn while the open was in flight
                    if close.push(reply.session_id).is_err() {
                        self.pending_close = Some(reply.session_id);
                    }
                    self.go_idle();
                }
                Ok(reply) => {
                    tracing::warn!(session_id = reply.session_id, "connection refused");
                    self.go_idle();
                }
                Err(_) => {
                    if !connect {
                        self.go_idle();
                    }
                }
            },
            SessionState::Active => {
                if !connect && close.push(self.status.session_id).is_ok() {
                    tracing::info!(session_id = self.status.session_id, "session closed");
                    self.go_idle();
                }
            }
        }
    }

    fn initiate(&mut self, destination: IpTuple, open: &mut Producer<IpTuple>) {
        if open.push(destination).is_ok() {
            tracing::debug!(
                address = destination.address,
                port = destination.port,
                "open requested"
            );
            self.state = SessionState::AwaitingConnection;
        }
    }

    /// The transport reported the session closed.
    pub fn remote_closed(&mut self, session_id: u16) {
        if self.state == SessionState::Active && self.status.session_id == session_id {
            tracing::warn!(session_id, "session closed by peer");
            self.go_idle();
        }
    }

    fn go_idle(&mut self) {
        self.state = SessionState::Idle;
        self.status.connected = false;
        self.status.space = 0;
        self.status.error = TxError::Closed;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Listener
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ListenState {
    #[default]
    Request,
    Awaiting,
    Listening,
}

/// Passive listener state machine.
#[derive(Debug, Default)]
pub struct Listener {
    state: ListenState,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> ListenState {
        self.state
    }

    pub fn step(&mut self, port: u16, request: &mut Producer<u16>, status: &mut Consumer<bool>) {
        match self.state {
            ListenState::Request => {
                if request.push(port).is_ok() {
                    self.state = ListenState::Awaiting;
                }
            }
            ListenState::Awaiting => {
                if let Ok(ok) = status.pop() {
                    if ok {
                        tracing::info!(port, "listening");
                        self.state = ListenState::Listening;
                    } else {
                        tracing::warn!(port, "listen refused, retrying");
                        self.state = ListenState::Request;
                    }
                }
            }
            ListenState::Listening => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        session: ActiveSession,
        core: SessionChannels,
        transport: TransportChannels,
    }

    const DEST: IpTuple = IpTuple {
        address: 0xC0A8_0A64,
        port: 23,
    };

    impl Rig {
        fn new() -> Self {
            let (core, transport) = session_link(8);
            Self {
                session: ActiveSession::new(),
                core,
                transport,
            }
        }

        fn step(&mut self, connect: bool) {
            self.session.step(
                connect,
                DEST,
                &mut self.core.tx_status,
                &mut self.core.open_connection,
                &mut self.core.connection_status,
                &mut self.core.close_connection,
            );
        }
    }

    #[test]
    fn test_connect_sequence() {
        let mut rig = Rig::new();
        rig.step(false);
        assert_eq!(rig.session.state(), SessionState::Idle);

        rig.step(true);
        assert_eq!(rig.session.state(), SessionState::AwaitingConnection);
        assert_eq!(rig.transport.open_connection.pop(), Ok(DEST));

        rig.step(true);
        assert_eq!(rig.session.state(), SessionState::AwaitingConnection);

        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 1, success: true })
            .unwrap();
        rig.step(true);
        assert_eq!(rig.session.state(), SessionState::Active);
        let status = rig.session.status();
        assert!(status.connected);
        assert_eq!(status.session_id, 1);
        assert_eq!(status.space, FULL_WINDOW);
        assert!(rig.session.can_send(256));
    }

    #[test]
    fn test_disconnect_closes_session() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 4, success: true })
            .unwrap();
        rig.step(true);
        rig.step(false);
        assert_eq!(rig.session.state(), SessionState::Idle);
        assert_eq!(rig.transport.close_connection.pop(), Ok(4));
        assert!(!rig.session.status().connected);
        assert_eq!(rig.session.status().error, TxError::Closed);
    }

    #[test]
    fn test_withdraw_while_awaiting() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.step(false);
        assert_eq!(rig.session.state(), SessionState::Idle);
        assert!(rig.transport.close_connection.is_empty());
    }

    #[test]
    fn test_late_success_after_withdraw_is_closed() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 9, success: true })
            .unwrap();
        rig.step(false);
        assert_eq!(rig.session.state(), SessionState::Idle);
        assert_eq!(rig.transport.close_connection.pop(), Ok(9));
    }

    #[test]
    fn test_late_success_close_retried_when_queue_full() {
        let (core, transport) = session_link(1);
        let mut rig = Rig {
            session: ActiveSession::new(),
            core,
            transport,
        };
        rig.core.close_connection.push(3).unwrap();

        rig.step(true);
        assert_eq!(rig.transport.open_connection.pop(), Ok(DEST));
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 7, success: true })
            .unwrap();
        rig.step(false);
        assert_eq!(rig.session.state(), SessionState::Idle);

        // Queue still full: only the earlier close is visible
        rig.step(false);
        assert_eq!(rig.transport.close_connection.pop(), Ok(3));
        assert!(rig.transport.close_connection.is_empty());

        rig.step(false);
        assert_eq!(rig.transport.close_connection.pop(), Ok(7));

        rig.step(false);
        assert!(rig.transport.close_connection.is_empty());
    }

    #[test]
    fn test_refused_then_reconnect() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 0, success: false })
            .unwrap();
        rig.step(true);
        assert_eq!(rig.session.state(), SessionState::Idle);
        rig.step(true);
        assert_eq!(rig.session.state(), SessionState::AwaitingConnection);
        assert_eq!(rig.transport.open_connection.slots(), 2);
    }

    #[test]
    fn test_tx_status_gates_sending() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 1, success: true })
            .unwrap();
        rig.step(true);

        rig.transport
            .tx_status
            .push(TxStatus { session_id: 1, length: 0x100, space: 255, error: TxError::Success })
            .unwrap();
        rig.step(true);
        assert!(!rig.session.can_send(256));
        assert!(rig.session.can_send(255));

        rig.transport
            .tx_status
            .push(TxStatus { session_id: 1, length: 0, space: 0xFFFF, error: TxError::OutOfSpace })
            .unwrap();
        rig.step(true);
        assert!(!rig.session.can_send(256));
        assert_eq!(rig.session.status().length, 0);
    }

    #[test]
    fn test_remote_close() {
        let mut rig = Rig::new();
        rig.step(true);
        rig.transport
            .connection_status
            .push(ConnectionStatus { session_id: 2, success: true })
            .unwrap();
        rig.step(true);
        rig.session.remote_closed(3);
        assert_eq!(rig.session.state(), SessionState::Active);
        rig.session.remote_closed(2);
        assert_eq!(rig.session.state(), SessionState::Idle);
        assert!(rig.transport.close_connection.is_empty());
    }

    #[test]
    fn test_status_register() {
        let status = SessionStatus {
            connected: true,
            session_id: 1,
            length: 0,
            space: FULL_WINDOW,
            error: TxError::OutOfSpace,
        };
        assert_eq!(status.register(), 0x8000_0000 | (2 << 29) | 0xFFFF);
    }

    #[test]
    fn test_listener_retries() {
        let (mut core, mut transport) = session_link(4);
        let mut listener = Listener::new();
        listener.step(7, &mut core.listen_port, &mut core.listen_status);
        assert_eq!(listener.state(), ListenState::Awaiting);
        assert_eq!(transport.listen_port.pop(), Ok(7));

        transport.listen_status.push(false).unwrap();
        listener.step(7, &mut core.listen_port, &mut core.listen_status);
        assert_eq!(listener.state(), ListenState::Request);

        listener.step(7, &mut core.listen_port, &mut core.listen_status);
        transport.listen_status.push(true).unwrap();
        listener.step(7, &mut core.listen_port, &mut core.listen_status);
        assert_eq!(listener.state(), ListenState::Listening);
        assert_eq!(transport.listen_port.slots(), 1);
    }
}
