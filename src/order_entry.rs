//! Order Entry - session management, order encoding and transmission.
//!
//! Each activation:
//! 1. steps the listener and the outbound connector,
//! 2. services one transport notification,
//! 3. counts one inbound meta or data item,
//! 4. takes one order (direct input first, then host-pushed orders),
//!    encodes it and either transmits it or drops it.
//!
//! An order is only consumed when the transmit queues can take a whole
//! message, so backpressure from the transport never splits a message.

use std::sync::Arc;

use rtrb::{Consumer, Producer};

use crate::control::{bits, ControlRegisters, ControlWord};
use crate::message::{MessageEncoder, MESSAGE_LEN, MESSAGE_WORDS};
use crate::session::{
    ActiveSession, DataWord, IpTuple, ListenState, Listener, Notification, ReadRequest,
    SessionChannels, SessionState, SessionStatus, TxMeta,
};
use crate::types::{OrderOpCode, OrderRequest, Side};

/// Order entry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderEntryStats {
    /// Orders pulled from either input
    pub rx_orders: u32,
    /// Orders encoded
    pub processed: u32,
    /// Orders handed to the transport
    pub tx_orders: u32,
    pub tx_meta: u32,
    pub tx_data: u32,
    /// Orders encoded but not sent (disconnected, window or error)
    pub tx_drop: u32,
    pub rx_meta: u32,
    pub rx_data: u32,
    pub notifications: u32,
    pub read_requests: u32,
}

/// The order entry stage.
pub struct OrderEntry {
    encoder: MessageEncoder,
    session: ActiveSession,
    listener: Listener,
    /// Inside an inbound data burst
    rx_burst: bool,
    stats: OrderEntryStats,
    capture: [u8; MESSAGE_LEN],
    control: Arc<ControlRegisters>,
}

impl OrderEntry {
    pub fn new(control: Arc<ControlRegisters>) -> Self {
        Self {
            encoder: MessageEncoder::new(),
            session: ActiveSession::new(),
            listener: Listener::new(),
            rx_burst: false,
            stats: OrderEntryStats::default(),
            capture: [0; MESSAGE_LEN],
            control,
        }
    }

    /// One activation. Returns true if anything moved.
    pub fn poll(
        &mut self,
        orders: &mut Consumer<OrderRequest>,
        host_orders: &mut Consumer<OrderRequest>,
        io: &mut SessionChannels,
    ) -> bool {
        let word = self.control.order_entry.stage.word();
        if word.reset_count() {
            self.stats = OrderEntryStats::default();
        }
        if word.reset_data() {
            self.rx_burst = false;
        }
        if word.halted() {
            return false;
        }

        let regs = &self.control.order_entry;
        let before = (self.session.state(), self.listener.state());
        self.listener
            .step(regs.listen_port(), &mut io.listen_port, &mut io.listen_status);
        self.session.step(
            word.has(bits::CONNECT),
            IpTuple {
                address: regs.dest_address(),
                port: regs.dest_port(),
            },
            &mut io.tx_status,
            &mut io.open_connection,
            &mut io.connection_status,
            &mut io.close_connection,
        );
        let mut progressed = before != (self.session.state(), self.listener.state());

        progressed |= self.service_notification(io);
        progressed |= self.service_rx(io);
        progressed |= self.service_order(word, orders, host_orders, io);
        progressed
    }

    fn service_notification(&mut self, io: &mut SessionChannels) -> bool {
        let Ok(&notification) = io.notifications.peek() else {
            return false;
        };
        if notification.length != 0 {
            if io.read_requests.is_full() {
                return false;
            }
            let _ = io.read_requests.push(ReadRequest {
                session_id: notification.session_id,
                length: notification.length,
            });
            self.stats.read_requests = self.stats.read_requests.wrapping_add(1);
        }
        let _ = io.notifications.pop();
        self.stats.notifications = self.stats.notifications.wrapping_add(1);
        self.handle_notification(&notification);
        true
    }

    fn handle_notification(&mut self, notification: &Notification) {
        if notification.closed {
            self.session.remote_closed(notification.session_id);
        } else if notification.opened {
            tracing::debug!(
                session_id = notification.session_id,
                address = notification.address,
                port = notification.port,
                "inbound session opened"
            );
        }
    }

    fn service_rx(&mut self, io: &mut SessionChannels) -> bool {
        if !self.rx_burst {
            if io.rx_meta.pop().is_err() {
                return false;
            }
            self.stats.rx_meta = self.stats.rx_meta.wrapping_add(1);
            self.rx_burst = true;
            return true;
        }
        let Ok(word) = io.rx_data.pop() else {
            return false;
        };
        self.stats.rx_data = self.stats.rx_data.wrapping_add(1);
        if word.last {
            self.rx_burst = false;
        }
        true
    }

    fn service_order(
        &mut self,
        word: ControlWord,
        orders: &mut Consumer<OrderRequest>,
        host_orders: &mut Consumer<OrderRequest>,
        io: &mut SessionChannels,
    ) -> bool {
        let sendable = self.session.can_send(MESSAGE_LEN);
        if sendable && (io.tx_meta.is_full() || io.tx_data.slots() < MESSAGE_WORDS) {
            return false;
        }
        let Ok(order) = orders.pop().or_else(|_| host_orders.pop()) else {
            return false;
        };
        self.stats.rx_orders = self.stats.rx_orders.wrapping_add(1);

        let message = self.encoder.encode(&order, word.has(bits::CHECKSUM));
        self.stats.processed = self.stats.processed.wrapping_add(1);

        if !sendable {
            self.stats.tx_drop = self.stats.tx_drop.wrapping_add(1);
            return true;
        }

        let _ = io.tx_meta.push(TxMeta {
            session_id: self.session.status().session_id,
            length: MESSAGE_LEN as u16,
            checksum: message.checksum,
            checksum_valid: message.checksum_valid,
        });
        self.stats.tx_meta = self.stats.tx_meta.wrapping_add(1);
        Self::send_words(&mut io.tx_data, message.words());
        self.stats.tx_data = self.stats.tx_data.wrapping_add(MESSAGE_WORDS as u32);
        self.stats.tx_orders = self.stats.tx_orders.wrapping_add(1);
        if !self.control.order_entry.stage.capture_frozen() {
            self.capture = message.bytes;
        }
        true
    }

    fn send_words(tx: &mut Producer<DataWord>, words: [u64; MESSAGE_WORDS]) {
        for (k, data) in words.into_iter().enumerate() {
            let _ = tx.push(DataWord {
                data,
                last: k == MESSAGE_WORDS - 1,
            });
        }
    }

    #[inline]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    #[inline]
    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    #[inline]
    pub fn listen_state(&self) -> ListenState {
        self.listener.state()
    }

    #[inline]
    pub fn stats(&self) -> OrderEntryStats {
        self.stats
    }

    /// Last encoded message.
    #[inline]
    pub fn capture(&self) -> &[u8; MESSAGE_LEN] {
        &self.capture
    }

    /// Touch the template and encoder tables before the hot loop.
    pub fn warm_up(&mut self) {
        let order = OrderRequest {
            timestamp: 0,
            op_code: OrderOpCode::Add,
            symbol_index: 0,
            order_id: 0,
            quantity: 0,
            price: 0,
            direction: Side::Bid,
        };
        for _ in 0..64 {
            std::hint::black_box(self.encoder.encode(std::hint::black_box(&order), true));
        }
    }
}
