/*! Registration slots for user-visible events.

A flat record of optional boxed callbacks, the Rust shape of the C-style
function-pointer + userdata pairs: whatever the userdata would have
carried is captured by the closure. The host owns the handlers; the core
never calls them after shutdown because it is gone itself.

Callbacks fire synchronously within the triggering `tick`/`handle_*` call
and receive plain slices; they must copy what they want to keep.
*/

use std::collections::HashMap;
use std::fmt;

use toxcore::crypto_core::PublicKey;
use toxcore::friend_connection::ConnectionKind;
use toxcore::messenger::friend::UserStatus;
use toxcore::messenger::packet::{ControlType, MessageKind};

/// Callback slots of the messenger. All slots start empty.
#[derive(Default)]
pub struct Callbacks {
    /// A friend request passed the roster filter.
    pub friend_request: Option<Box<FnMut(&PublicKey, &[u8])>>,
    /// A chat message arrived: `(friend, kind, message)`.
    pub friend_message: Option<Box<FnMut(u32, MessageKind, &[u8])>>,
    /// A friend changed its nickname: `(friend, name)`.
    pub name_change: Option<Box<FnMut(u32, &[u8])>>,
    /// A friend changed its status message: `(friend, message)`.
    pub status_message_change: Option<Box<FnMut(u32, &[u8])>>,
    /// A friend changed its user status: `(friend, status)`.
    pub user_status_change: Option<Box<FnMut(u32, UserStatus)>>,
    /// A friend started or stopped typing: `(friend, is_typing)`.
    pub typing_change: Option<Box<FnMut(u32, bool)>>,
    /// A sent message was delivered: `(friend, message_id)`.
    pub read_receipt: Option<Box<FnMut(u32, u32)>>,
    /// The connection kind of a friend changed: `(friend, kind)`.
    pub connection_status: Option<Box<FnMut(u32, ConnectionKind)>>,
    /// The connectivity of the core itself changed.
    pub core_connection_change: Option<Box<FnMut(ConnectionKind)>>,
    /// A friend offers a file: `(friend, file_number, file_type, size,
    /// filename)`.
    pub file_send_request: Option<Box<FnMut(u32, u32, u32, u64, &[u8])>>,
    /// A control arrived for a transfer: `(friend, file_number,
    /// control)`.
    pub file_control: Option<Box<FnMut(u32, u32, ControlType)>>,
    /// A chunk of file data arrived: `(friend, file_number, position,
    /// data)`. A zero-length chunk means end of stream.
    pub file_data: Option<Box<FnMut(u32, u32, u64, &[u8])>>,
    /// The engine wants the next chunk: `(friend, file_number, position,
    /// length)`. Zero length means the transfer completed.
    pub file_req_chunk: Option<Box<FnMut(u32, u32, u64, usize)>>,
    /// An opaque group invite arrived: `(friend, data)`.
    pub group_invite: Option<Box<FnMut(u32, &[u8])>>,
    /// An opaque MSI packet arrived: `(friend, data)`.
    pub msi_packet: Option<Box<FnMut(u32, &[u8])>>,
    /// A custom lossy packet arrived: `(friend, data)`, first byte
    /// included.
    pub lossy_packet: Option<Box<FnMut(u32, &[u8])>>,
    /// A custom lossless packet arrived: `(friend, data)`, first byte
    /// included.
    pub lossless_packet: Option<Box<FnMut(u32, &[u8])>>,
    /// Per-friend, per-byte-code handlers for the reserved lossy A/V
    /// sub-range, keyed by `(friend, packet id % PACKET_LOSSY_AV_RESERVED)`.
    pub rtp_packet: HashMap<(u32, u8), Box<FnMut(u32, &[u8])>>,
}

impl Callbacks {
    /// Create an empty callback record.
    pub fn new() -> Callbacks {
        Callbacks::default()
    }

    /// Drop the per-byte RTP handlers of a removed friend.
    pub fn clear_rtp_handlers(&mut self, friend: u32) {
        self.rtp_packet.retain(|&(f, _), _| f != friend);
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Callbacks { .. }")
    }
}
