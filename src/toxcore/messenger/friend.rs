/*! Friend and device records of the roster.

A friend is identified by one or more long-term public keys, one per
device. Slot 0 of the device list is the primary identity; the friend row
is free iff its status is `NotFriend`.
*/

use nom::le_u8;

use toxcore::binary_io::*;
use toxcore::crypto_core::PublicKey;
use toxcore::friend_connection::ConnectionKind;
use toxcore::messenger::file_transfer::{FileTransfer, MAX_CONCURRENT_FILE_PIPES};
use toxcore::messenger::receipt::Receipts;
use toxcore::toxid::NoSpam;

/// Maximum length of own and friend nicknames in bytes.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum length of a status message in bytes.
pub const MAX_STATUSMESSAGE_LENGTH: usize = 1007;

/// Maximum length of the greeting sent along with a friend request.
pub const MAX_FRIEND_REQUEST_DATA_SIZE: usize = 1016;

/// Seconds before an unanswered friend request is re-sent. The per-friend
/// timeout doubles on every expiry.
pub const FRIENDREQUEST_TIMEOUT: u64 = 5;

/** Status of a friend row.

Also stored in the saved state, hence the wire impls.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd)]
pub enum FriendStatus {
    /// Not a friend; the slot is free.
    NotFriend   = 0,
    /// Friend was added; no friend request has gone out yet.
    Added       = 1,
    /// Friend request was sent to the friend.
    FrSent      = 2,
    /// Friend confirmed; known to have accepted the request.
    Confirmed   = 3,
    /// Friend has come online on at least one device.
    Online      = 4,
}

impl FromBytes for FriendStatus {
    named!(from_bytes<FriendStatus>, switch!(le_u8,
        0 => value!(FriendStatus::NotFriend) |
        1 => value!(FriendStatus::Added) |
        2 => value!(FriendStatus::FrSent) |
        3 => value!(FriendStatus::Confirmed) |
        4 => value!(FriendStatus::Online)
    ));
}

impl ToBytes for FriendStatus {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(*self as u8)
        )
    }
}

/** Status of one device of a friend. Mirrors the friend lifecycle but per
device.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd)]
pub enum DeviceStatus {
    /// Not a device; the slot is free.
    NotDevice = 0,
    /// Added but not yet known to belong to the friend.
    Pending   = 1,
    /// Confirmed to belong to the friend.
    Confirmed = 2,
    /// Device is online.
    Online    = 3,
}

impl FromBytes for DeviceStatus {
    named!(from_bytes<DeviceStatus>, switch!(le_u8,
        0 => value!(DeviceStatus::NotDevice) |
        1 => value!(DeviceStatus::Pending) |
        2 => value!(DeviceStatus::Confirmed) |
        3 => value!(DeviceStatus::Online)
    ));
}

impl ToBytes for DeviceStatus {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(*self as u8)
        )
    }
}

/** User status. Used for both own & friend statuses.

https://zetok.github.io/tox-spec/#userstatus
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserStatus {
    /// User is online, no special status.
    None = 0,
    /// User is `Away`.
    Away = 1,
    /// User is `Busy`.
    Busy = 2,
}

/// Returns `UserStatus::None`.
impl Default for UserStatus {
    fn default() -> Self {
        UserStatus::None
    }
}

impl FromBytes for UserStatus {
    named!(from_bytes<UserStatus>, switch!(le_u8,
        0 => value!(UserStatus::None) |
        1 => value!(UserStatus::Away) |
        2 => value!(UserStatus::Busy)
    ));
}

impl ToBytes for UserStatus {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(*self as u8)
        )
    }
}

/** One public-key-addressable endpoint of a friend.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Device {
    /// Lifecycle status of the device.
    pub status: DeviceStatus,
    /// Long-term `PublicKey` of the device.
    pub real_pk: PublicKey,
    /// Handle of the friend connection of this device.
    pub conn_id: usize,
}

impl Device {
    /// Create a new `Device` record.
    pub fn new(status: DeviceStatus, real_pk: PublicKey, conn_id: usize) -> Device {
        Device { status, real_pk, conn_id }
    }
}

/** A roster entry.

Everything the messenger knows about one friend: lifecycle status, the
device list (slot 0 is the primary identity), the cached profile, the
pending friend request, receipts and the file transfer slots.
*/
#[derive(Clone, Debug)]
pub struct Friend {
    /// Lifecycle status; `NotFriend` means the slot is free.
    pub status: FriendStatus,
    /// Devices of this friend, primary first. Non-empty while the slot is
    /// occupied.
    pub devices: Vec<Device>,

    /// Cached nickname of the friend.
    pub name: Vec<u8>,
    /// Cached status message of the friend.
    pub status_message: Vec<u8>,
    /// Cached user status of the friend.
    pub user_status: UserStatus,
    /// Whether the friend is currently typing to us.
    pub is_typing: bool,
    /// Whether we are currently typing to the friend.
    pub user_is_typing: bool,

    /// Own nickname was delivered since the last reconnect.
    pub name_sent: bool,
    /// Own status message was delivered since the last reconnect.
    pub status_message_sent: bool,
    /// Own user status was delivered since the last reconnect.
    pub user_status_sent: bool,
    /// Own typing flag was delivered since the last reconnect.
    pub typing_sent: bool,

    /// Greeting to send along with the friend request.
    pub info: Vec<u8>,
    /// `NoSpam` the friend request is addressed with.
    pub request_nospam: NoSpam,
    /// When the last friend request went out (unix seconds).
    pub request_last_sent: u64,
    /// Current retry timeout of the friend request in seconds.
    pub request_timeout: u64,

    /// Id of the last sent message; only ever increases.
    pub message_id: u32,
    /// Receipts pending delivery confirmation, in send order.
    pub receipts: Receipts,

    /// Outgoing file transfer slots.
    pub file_sending: [FileTransfer; MAX_CONCURRENT_FILE_PIPES],
    /// Incoming file transfer slots.
    pub file_receiving: [FileTransfer; MAX_CONCURRENT_FILE_PIPES],
    /// Number of occupied outgoing slots.
    pub num_sending_files: u32,

    /// Last connection kind reported through the callback.
    pub last_connection_kind: ConnectionKind,
    /// When the friend was last seen online (unix seconds).
    pub last_seen_time: u64,
}

/// An unoccupied roster slot.
impl Default for Friend {
    fn default() -> Friend {
        Friend {
            status: FriendStatus::NotFriend,
            devices: Vec::new(),
            name: Vec::new(),
            status_message: Vec::new(),
            user_status: UserStatus::default(),
            is_typing: false,
            user_is_typing: false,
            name_sent: false,
            status_message_sent: false,
            user_status_sent: false,
            typing_sent: false,
            info: Vec::new(),
            request_nospam: NoSpam([0; 4]),
            request_last_sent: 0,
            request_timeout: FRIENDREQUEST_TIMEOUT,
            message_id: 0,
            receipts: Receipts::new(),
            file_sending: [FileTransfer::default(); MAX_CONCURRENT_FILE_PIPES],
            file_receiving: [FileTransfer::default(); MAX_CONCURRENT_FILE_PIPES],
            num_sending_files: 0,
            last_connection_kind: ConnectionKind::None,
            last_seen_time: 0,
        }
    }
}

impl Friend {
    /// Create a roster entry with a single (primary) device.
    pub fn new(status: FriendStatus, device: Device) -> Friend {
        Friend {
            status,
            devices: vec![device],
            name: Vec::new(),
            status_message: Vec::new(),
            user_status: UserStatus::default(),
            is_typing: false,
            user_is_typing: false,
            name_sent: false,
            status_message_sent: false,
            user_status_sent: false,
            typing_sent: false,
            info: Vec::new(),
            request_nospam: NoSpam([0; 4]),
            request_last_sent: 0,
            request_timeout: FRIENDREQUEST_TIMEOUT,
            message_id: 0,
            receipts: Receipts::new(),
            file_sending: [FileTransfer::default(); MAX_CONCURRENT_FILE_PIPES],
            file_receiving: [FileTransfer::default(); MAX_CONCURRENT_FILE_PIPES],
            num_sending_files: 0,
            last_connection_kind: ConnectionKind::None,
            last_seen_time: 0,
        }
    }

    /// Whether any device of the friend is online.
    pub fn any_device_online(&self) -> bool {
        self.devices.iter().any(|dev| dev.status == DeviceStatus::Online)
    }

    /// Forget which profile packets were delivered, so that all of them go
    /// out again on the next tick.
    pub fn reset_sent_flags(&mut self) {
        self.name_sent = false;
        self.status_message_sent = false;
        self.user_status_sent = false;
        self.typing_sent = false;
    }
}
