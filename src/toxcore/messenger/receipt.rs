/*! Per-friend queue of read receipts.

Every sent message pairs the transport packet number it went out with and
the application-level message id. Once the transport confirms a contiguous
prefix of packet numbers, the corresponding message ids are reported
through the `read_receipt` callback, strictly in send order.
*/

use std::collections::VecDeque;

/// One pending receipt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Receipt {
    /// Number of the transport packet the message went out in.
    pub packet_num: u32,
    /// Id returned to the caller when the message was sent.
    pub msg_id: u32,
}

/// FIFO of pending receipts of one friend.
#[derive(Clone, Debug, Default)]
pub struct Receipts {
    queue: VecDeque<Receipt>,
}

impl Receipts {
    /// Create an empty queue.
    pub fn new() -> Receipts {
        Receipts::default()
    }

    /// Append a receipt for a freshly sent message.
    pub fn add(&mut self, packet_num: u32, msg_id: u32) {
        self.queue.push_back(Receipt { packet_num, msg_id });
    }

    /// The oldest unconfirmed receipt, if any.
    pub fn front(&self) -> Option<Receipt> {
        self.queue.front().cloned()
    }

    /// Drop the oldest receipt after its delivery was confirmed.
    pub fn pop_front(&mut self) -> Option<Receipt> {
        self.queue.pop_front()
    }

    /// Drop all pending receipts. Used on disconnect and friend removal.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Whether no receipts are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending receipts.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipts_fifo_order() {
        let mut receipts = Receipts::new();
        receipts.add(10, 1);
        receipts.add(11, 2);
        receipts.add(12, 3);
        assert_eq!(receipts.len(), 3);
        assert_eq!(receipts.pop_front(), Some(Receipt { packet_num: 10, msg_id: 1 }));
        assert_eq!(receipts.pop_front(), Some(Receipt { packet_num: 11, msg_id: 2 }));
        assert_eq!(receipts.front(), Some(Receipt { packet_num: 12, msg_id: 3 }));
        receipts.clear();
        assert!(receipts.is_empty());
    }
}
