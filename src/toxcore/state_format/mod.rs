/*! **Tox State Format (TSF)** sections owned by the messenger.

Versioned serialization of the friend roster (with the legacy
pre-multi-device friends section), own nickname, status message, user
status and the cached TCP relay list. The legacy section is accepted on
load but never written.
*/

use nom::{be_u16, be_u64, le_u8, le_u32, le_u64, rest, ErrorKind, Needed};

use toxcore::binary_io::*;
use toxcore::crypto_core::*;
use toxcore::messenger::friend::{
    DeviceStatus,
    FriendStatus,
    UserStatus,
    MAX_NAME_LENGTH,
    MAX_STATUSMESSAGE_LENGTH,
};
use toxcore::packed_node::TcpUdpPackedNode;
use toxcore::toxid::{NoSpam, NOSPAMBYTES};

/// Room reserved for the friend request greeting in a saved friend.
pub const SAVED_FRIEND_REQUEST_SIZE: usize = 1024;

/// According to https://zetok.github.io/tox-spec/#sections
const SECTION_MAGIC: &[u8; 2] = &[0xce, 0x01];

/// Version of the multi-device friends section written by `save`.
pub const FRIENDS_FORMAT_VERSION: u8 = 1;

/// Error that can happen when loading a saved state.
#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum StateLoadError {
    /// Error indicates that the state bytes can't be parsed.
    #[fail(display = "State deserialize error: {:?}", error)]
    Deserialize {
        /// Parsing error
        error: ErrorKind,
    },
    /// Error indicates that more data is needed to parse the state.
    #[fail(display = "State bytes should not be incomplete: {:?}", needed)]
    Incomplete {
        /// Required data size to be parsed
        needed: Needed,
    },
}

/** One device of a saved friend: its lifecycle status and key.

Length | Contents
------ | --------
`1`    | status
`32`   | `PublicKey`
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SavedDevice {
    /// Status of the device.
    pub status: DeviceStatus,
    /// Long-term `PublicKey` of the device.
    pub real_pk: PublicKey,
}

/// Number of bytes of a serialized [`SavedDevice`](./struct.SavedDevice.html).
pub const SAVEDDEVICEBYTES: usize = 1 + PUBLICKEYBYTES;

impl FromBytes for SavedDevice {
    named!(from_bytes<SavedDevice>, do_parse!(
        status: call!(DeviceStatus::from_bytes) >>
        real_pk: call!(PublicKey::from_bytes) >>
        (SavedDevice {
            status,
            real_pk,
        })
    ));
}

impl ToBytes for SavedDevice {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(self.status as u8) >>
            gen_slice!(self.real_pk.as_ref())
        )
    }
}

/** A friend in the current (multi-device) on-disk format.

Fixed-width record followed by `dev_count` [`SavedDevice`]
(./struct.SavedDevice.html)s. A record announcing zero devices is
corrupt and skipped by the loader.

Length   | Contents
-------- | --------
`1`      | status
`1024`   | friend request greeting
`2`      | actual greeting size (big endian)
`128`    | name
`2`      | actual name size (big endian)
`1007`   | status message
`2`      | actual status message size (big endian)
`1`      | user status
`4`      | `NoSpam` of the pending friend request
`8`      | last seen time (big endian)
`1`      | number of devices
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SavedFriend {
    /// Status of the friend.
    pub status: FriendStatus,
    /// Greeting of the pending friend request.
    pub info: Vec<u8>,
    /// Name of the friend.
    pub name: Vec<u8>,
    /// Status message of the friend.
    pub status_message: Vec<u8>,
    /// User status of the friend.
    pub user_status: UserStatus,
    /// `NoSpam` the pending friend request is addressed with.
    pub nospam: NoSpam,
    /// When the friend was last seen online.
    pub last_seen_time: u64,
    /// Devices of the friend, primary first.
    pub devices: Vec<SavedDevice>,
}

/// Number of bytes of a serialized [`SavedFriend`](./struct.SavedFriend.html)
/// without its devices.
pub const SAVEDFRIENDBYTES: usize = 1 // status
    + SAVED_FRIEND_REQUEST_SIZE
    + 2 // actual size of the greeting
    + MAX_NAME_LENGTH
    + 2 // actual size of the name
    + MAX_STATUSMESSAGE_LENGTH
    + 2 // actual size of the status message
    + 1 // user status
    + NOSPAMBYTES
    + 8 // last seen time
    + 1; // device count

impl FromBytes for SavedFriend {
    named!(from_bytes<SavedFriend>, do_parse!(
        status: call!(FriendStatus::from_bytes) >>
        info_bytes: take!(SAVED_FRIEND_REQUEST_SIZE) >>
        info_size: verify!(be_u16, |len| len as usize <= SAVED_FRIEND_REQUEST_SIZE) >>
        info: value!(info_bytes[..info_size as usize].to_vec()) >>
        name_bytes: take!(MAX_NAME_LENGTH) >>
        name_length: verify!(be_u16, |len| len as usize <= MAX_NAME_LENGTH) >>
        name: value!(name_bytes[..name_length as usize].to_vec()) >>
        status_message_bytes: take!(MAX_STATUSMESSAGE_LENGTH) >>
        status_message_length: verify!(be_u16, |len| len as usize <= MAX_STATUSMESSAGE_LENGTH) >>
        status_message: value!(status_message_bytes[..status_message_length as usize].to_vec()) >>
        user_status: call!(UserStatus::from_bytes) >>
        nospam: call!(NoSpam::from_bytes) >>
        last_seen_time: be_u64 >>
        dev_count: le_u8 >>
        devices: count!(SavedDevice::from_bytes, dev_count as usize) >>
        (SavedFriend {
            status,
            info,
            name,
            status_message,
            user_status,
            nospam,
            last_seen_time,
            devices,
        })
    ));
}

impl ToBytes for SavedFriend {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        let mut info_pad = self.info.clone();
        let mut name_pad = self.name.clone();
        let mut status_message_pad = self.status_message.clone();
        info_pad.resize(SAVED_FRIEND_REQUEST_SIZE, 0);
        name_pad.resize(MAX_NAME_LENGTH, 0);
        status_message_pad.resize(MAX_STATUSMESSAGE_LENGTH, 0);

        do_gen!(buf,
            gen_be_u8!(self.status as u8) >>
            gen_slice!(info_pad.as_slice()) >>
            gen_be_u16!(self.info.len()) >>
            gen_slice!(name_pad.as_slice()) >>
            gen_be_u16!(self.name.len()) >>
            gen_slice!(status_message_pad.as_slice()) >>
            gen_be_u16!(self.status_message.len()) >>
            gen_be_u8!(self.user_status as u8) >>
            gen_slice!(self.nospam.0) >>
            gen_be_u64!(self.last_seen_time) >>
            gen_be_u8!(self.devices.len() as u8) >>
            gen_many_ref!(&self.devices, |buf, dev| SavedDevice::to_bytes(dev, buf))
        )
    }
}

/** The current friends section: a format version byte followed by
variable-length multi-device [`SavedFriend`](./struct.SavedFriend.html)
records.
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Friends(pub Vec<SavedFriend>);

impl Friends {
    /// Serialized length of the section payload.
    pub fn payload_len(&self) -> usize {
        1 + self.0.iter()
            .map(|f| SAVEDFRIENDBYTES + f.devices.len() * SAVEDDEVICEBYTES)
            .sum::<usize>()
    }
}

impl FromBytes for Friends {
    named!(from_bytes<Friends>, do_parse!(
        tag!([0x0c, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        verify!(le_u8, |version| version == FRIENDS_FORMAT_VERSION) >>
        friends: many0!(SavedFriend::from_bytes) >>
        (Friends(friends))
    ));
}

impl ToBytes for Friends {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x000c) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_be_u8!(FRIENDS_FORMAT_VERSION) >>
            gen_many_ref!(&self.0, |buf, friend| SavedFriend::to_bytes(friend, buf))
        )
    }
}

/** Friend state format of pre-multi-device versions, compatible with what
C toxcore does on `GCC x86{,_x64}` platforms (including the compiler
padding bytes).

Data that is supposed to be strings (friend request message, friend name,
friend status message) might, or might not even be a valid UTF-8.
**Anything using that data should validate whether it's actually correct
UTF-8!**

https://zetok.github.io/tox-spec/#friends-0x03
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OldFriendState {
    /// Status of the friend.
    pub status: FriendStatus,
    /// Long-term `PublicKey` of the friend.
    pub pk: PublicKey,
    /// Friend request message that is being sent to friend.
    pub info: Vec<u8>,
    /// Name of the friend.
    pub name: Vec<u8>,
    /// Status message of the friend.
    pub status_message: Vec<u8>,
    /// User status of the friend.
    pub user_status: UserStatus,
    /// `NoSpam` of the pending friend request.
    pub nospam: NoSpam,
    /// Time when friend was last seen online.
    pub last_seen: u64,
}

/// Number of bytes of a serialized [`OldFriendState`]
/// (./struct.OldFriendState.html).
pub const OLDFRIENDSTATEBYTES: usize = 1      // "Status"
    + PUBLICKEYBYTES
    /* Friend request message      */ + SAVED_FRIEND_REQUEST_SIZE
    /* padding1                    */ + 1
    /* actual size of FR message   */ + 2
    /* Name;                       */ + MAX_NAME_LENGTH
    /* actual size of Name         */ + 2
    /* Status msg;                 */ + MAX_STATUSMESSAGE_LENGTH
    /* padding2                    */ + 1
    /* actual size of status msg   */ + 2
    /* UserStatus                  */ + 1
    /* padding3                    */ + 3
    /* only used for sending FR    */ + NOSPAMBYTES
    /* last time seen              */ + 8;

impl FromBytes for OldFriendState {
    named!(from_bytes<OldFriendState>, do_parse!(
        status: call!(FriendStatus::from_bytes) >>
        pk: call!(PublicKey::from_bytes) >>
        info_bytes: take!(SAVED_FRIEND_REQUEST_SIZE) >>
        take!(1) >>
        info_size: verify!(be_u16, |len| len as usize <= SAVED_FRIEND_REQUEST_SIZE) >>
        info: value!(info_bytes[..info_size as usize].to_vec()) >>
        name_bytes: take!(MAX_NAME_LENGTH) >>
        name_length: verify!(be_u16, |len| len as usize <= MAX_NAME_LENGTH) >>
        name: value!(name_bytes[..name_length as usize].to_vec()) >>
        status_message_bytes: take!(MAX_STATUSMESSAGE_LENGTH) >>
        take!(1) >>
        status_message_length: verify!(be_u16, |len| len as usize <= MAX_STATUSMESSAGE_LENGTH) >>
        status_message: value!(status_message_bytes[..status_message_length as usize].to_vec()) >>
        user_status: call!(UserStatus::from_bytes) >>
        take!(3) >>
        nospam: call!(NoSpam::from_bytes) >>
        last_seen: le_u64 >>
        (OldFriendState {
            status,
            pk,
            info,
            name,
            status_message,
            user_status,
            nospam,
            last_seen,
        })
    ));
}

impl ToBytes for OldFriendState {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        let mut info_pad = self.info.clone();
        let mut name_pad = self.name.clone();
        let mut status_message_pad = self.status_message.clone();
        info_pad.resize(SAVED_FRIEND_REQUEST_SIZE, 0);
        name_pad.resize(MAX_NAME_LENGTH, 0);
        status_message_pad.resize(MAX_STATUSMESSAGE_LENGTH, 0);

        do_gen!(buf,
            gen_be_u8!(self.status as u8) >>
            gen_slice!(self.pk.as_ref()) >>
            gen_slice!(info_pad.as_slice()) >>
            gen_be_u8!(0) >>
            gen_be_u16!(self.info.len()) >>
            gen_slice!(name_pad.as_slice()) >>
            gen_be_u16!(self.name.len()) >>
            gen_slice!(status_message_pad.as_slice()) >>
            gen_be_u8!(0) >>
            gen_be_u16!(self.status_message.len()) >>
            gen_be_u8!(self.user_status as u8) >>
            gen_be_u8!(0) >>
            gen_be_u16!(0) >>
            gen_slice!(self.nospam.0) >>
            gen_le_u64!(self.last_seen)
        )
    }
}

/** The legacy single-device friends section. Read for compatibility,
never written.
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OldFriends(pub Vec<OldFriendState>);

impl OldFriends {
    /// Serialized length of the section payload.
    pub fn payload_len(&self) -> usize {
        self.0.len() * OLDFRIENDSTATEBYTES
    }
}

impl FromBytes for OldFriends {
    named!(from_bytes<OldFriends>, do_parse!(
        tag!([0x03, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        friends: many0!(flat_map!(take!(OLDFRIENDSTATEBYTES), OldFriendState::from_bytes)) >>
        (OldFriends(friends))
    ));
}

impl ToBytes for OldFriends {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x0003) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_many_ref!(&self.0, |buf, friend| OldFriendState::to_bytes(friend, buf))
        )
    }
}

/** Own name, up to [`MAX_NAME_LENGTH`]
(../messenger/friend/constant.MAX_NAME_LENGTH.html) bytes long.
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Name(pub Vec<u8>);

impl FromBytes for Name {
    named!(from_bytes<Name>, do_parse!(
        tag!([0x04, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        name_bytes: rest >>
        name: value!(name_bytes.to_vec()) >>
        (Name(name))
    ));
}

impl ToBytes for Name {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x0004) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_slice!(self.0.as_slice())
        )
    }
}

/** Own status message, up to [`MAX_STATUSMESSAGE_LENGTH`]
(../messenger/friend/constant.MAX_STATUSMESSAGE_LENGTH.html) bytes.
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusMsg(pub Vec<u8>);

impl FromBytes for StatusMsg {
    named!(from_bytes<StatusMsg>, do_parse!(
        tag!([0x05, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        status_msg_bytes: rest >>
        status_msg: value!(status_msg_bytes.to_vec()) >>
        (StatusMsg(status_msg))
    ));
}

impl ToBytes for StatusMsg {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x0005) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_slice!(self.0.as_slice())
        )
    }
}

/// Length in bytes of the user status section payload.
pub const USER_STATUS_LEN: usize = 1;

/// Own user status section.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Status(pub UserStatus);

impl FromBytes for Status {
    named!(from_bytes<Status>, do_parse!(
        tag!([0x06, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        user_status: call!(UserStatus::from_bytes) >>
        (Status(user_status))
    ));
}

impl ToBytes for Status {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x0006) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_be_u8!(self.0 as u8)
        )
    }
}

/// The cached TCP relay list.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TcpRelays(pub Vec<TcpUdpPackedNode>);

impl TcpRelays {
    /// Serialized length of the section payload.
    pub fn payload_len(&self) -> usize {
        self.0.iter().map(TcpUdpPackedNode::packed_size).sum()
    }
}

impl FromBytes for TcpRelays {
    named!(from_bytes<TcpRelays>, do_parse!(
        tag!([0x0a, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        nodes: many0!(TcpUdpPackedNode::from_bytes) >>
        (TcpRelays(nodes))
    ));
}

impl ToBytes for TcpRelays {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x000a) >>
            gen_slice!(SECTION_MAGIC) >>
            gen_many_ref!(&self.0, |buf, node| TcpUdpPackedNode::to_bytes(node, buf))
        )
    }
}

/// End of the state format data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Eof;

impl FromBytes for Eof {
    named!(from_bytes<Eof>, do_parse!(
        tag!([0xff, 0x00]) >>
        tag!(SECTION_MAGIC) >>
        (Eof)
    ));
}

impl ToBytes for Eof {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_le_u16!(0x00ff) >>
            gen_slice!(SECTION_MAGIC)
        )
    }
}

/** Sections of the state format.

https://zetok.github.io/tox-spec/#sections
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Section {
    /// Current multi-device friends section.
    Friends(Friends),
    /// Legacy single-device friends section; accepted on load, never
    /// written.
    OldFriends(OldFriends),
    /// Own [`Name`](./struct.Name.html).
    Name(Name),
    /// Own [`StatusMsg`](./struct.StatusMsg.html).
    StatusMsg(StatusMsg),
    /// Own [`Status`](./struct.Status.html).
    Status(Status),
    /// Cached [`TcpRelays`](./struct.TcpRelays.html).
    TcpRelays(TcpRelays),
    /// End of file. https://zetok.github.io/tox-spec/#eof-0xff
    Eof(Eof),
}

impl Section {
    /// Serialized length of the section payload following the type and
    /// magic bytes.
    fn payload_len(&self) -> usize {
        match *self {
            Section::Friends(ref p) => p.payload_len(),
            Section::OldFriends(ref p) => p.payload_len(),
            Section::Name(ref p) => p.0.len(),
            Section::StatusMsg(ref p) => p.0.len(),
            Section::Status(_) => USER_STATUS_LEN,
            Section::TcpRelays(ref p) => p.payload_len(),
            Section::Eof(_) => 0,
        }
    }
}

impl FromBytes for Section {
    named!(from_bytes<Section>, alt!(
        map!(Friends::from_bytes, Section::Friends) |
        map!(OldFriends::from_bytes, Section::OldFriends) |
        map!(Name::from_bytes, Section::Name) |
        map!(StatusMsg::from_bytes, Section::StatusMsg) |
        map!(Status::from_bytes, Section::Status) |
        map!(TcpRelays::from_bytes, Section::TcpRelays) |
        map!(Eof::from_bytes, Section::Eof)
    ));
}

impl ToBytes for Section {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        let len = self.payload_len() as u32;
        match *self {
            Section::Friends(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| Friends::to_bytes(data, buf), p)
                )
            },
            Section::OldFriends(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| OldFriends::to_bytes(data, buf), p)
                )
            },
            Section::Name(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| Name::to_bytes(data, buf), p)
                )
            },
            Section::StatusMsg(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| StatusMsg::to_bytes(data, buf), p)
                )
            },
            Section::Status(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| Status::to_bytes(data, buf), p)
                )
            },
            Section::TcpRelays(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| TcpRelays::to_bytes(data, buf), p)
                )
            },
            Section::Eof(ref p) => {
                do_gen!(buf,
                    gen_le_u32!(len) >>
                    gen_call!(|buf, data| Eof::to_bytes(data, buf), p)
                )
            },
        }
    }
}

/// State Format magic bytes.
const STATE_MAGIC: &[u8; 4] = &[0x1f, 0x1b, 0xed, 0x15];

/** Tox State sections. Use to manage `.tox` save files.

https://zetok.github.io/tox-spec/#state-format
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct State {
    /// Sections of the state, in file order.
    pub sections: Vec<Section>,
}

impl State {
    /// Buffer size sufficient to serialize the whole state.
    pub fn buf_len(&self) -> usize {
        8 + self.sections.iter()
            .map(|s| 8 + s.payload_len())
            .sum::<usize>()
    }
}

impl FromBytes for State {
    named!(from_bytes<State>, do_parse!(
        tag!(&[0; 4][..]) >>
        tag!(STATE_MAGIC) >>
        sections: many0!(flat_map!(length_data!(map!(le_u32, |len| len + 4)), Section::from_bytes)) >>
        (State {
            sections,
        })
    ));
}

impl ToBytes for State {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_slice!([0; 4]) >>
            gen_slice!(STATE_MAGIC) >>
            gen_many_ref!(&self.sections, |buf, section| Section::to_bytes(section, buf))
        )
    }
}
