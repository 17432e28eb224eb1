/*! Top-level Messenger packets.

In-band packets exchanged between connected friends: one-byte packet id
followed by a type-specific payload. Numbers are big-endian. Text fields
are not NUL-terminated on the wire; decoders enforce the length bounds
before anything reaches a callback.
*/

use nom::{be_u32, be_u64, le_u8, rest};

use toxcore::binary_io::*;
use toxcore::messenger::file_transfer::*;
use toxcore::messenger::friend::{MAX_NAME_LENGTH, MAX_STATUSMESSAGE_LENGTH, UserStatus};
use toxcore::net_crypto::MAX_CRYPTO_DATA_SIZE;

/// Id of the [`Online`](./struct.Online.html) packet.
pub const PACKET_ID_ONLINE: u8 = 24;
/// Id of the [`Offline`](./struct.Offline.html) packet.
pub const PACKET_ID_OFFLINE: u8 = 25;
/// Id of the [`Nickname`](./struct.Nickname.html) packet.
pub const PACKET_ID_NICKNAME: u8 = 48;
/// Id of the [`StatusMessage`](./struct.StatusMessage.html) packet.
pub const PACKET_ID_STATUSMESSAGE: u8 = 49;
/// Id of the [`UserStatusUpdate`](./struct.UserStatusUpdate.html) packet.
pub const PACKET_ID_USERSTATUS: u8 = 50;
/// Id of the [`Typing`](./struct.Typing.html) packet.
pub const PACKET_ID_TYPING: u8 = 51;
/// Id of a normal chat message.
pub const PACKET_ID_MESSAGE: u8 = 64;
/// Id of an action ("/me") chat message: `PACKET_ID_MESSAGE + 1`.
pub const PACKET_ID_ACTION: u8 = 65;
/// Id of the [`Msi`](./struct.Msi.html) media signalling packet.
pub const PACKET_ID_MSI: u8 = 69;
/// Id of the [`FileSendRequest`](./struct.FileSendRequest.html) packet.
pub const PACKET_ID_FILE_SENDREQUEST: u8 = 80;
/// Id of the [`FileControl`](./struct.FileControl.html) packet.
pub const PACKET_ID_FILE_CONTROL: u8 = 81;
/// Id of the [`FileData`](./struct.FileData.html) packet.
pub const PACKET_ID_FILE_DATA: u8 = 82;
/// Id of the [`GroupInvite`](./struct.GroupInvite.html) packet.
pub const PACKET_ID_INVITE_GROUPCHAT: u8 = 96;

/// First id of the application-defined lossless range.
pub const PACKET_ID_LOSSLESS_RANGE_START: u8 = 160;
/// Size of the application-defined lossless range.
pub const PACKET_ID_LOSSLESS_RANGE_SIZE: u8 = 32;
/// First id of the application-defined lossy range.
pub const PACKET_ID_LOSSY_RANGE_START: u8 = 200;
/// Size of the application-defined lossy range.
pub const PACKET_ID_LOSSY_RANGE_SIZE: u8 = 63;
/// Leading part of the lossy range reserved for per-byte RTP handlers.
pub const PACKET_LOSSY_AV_RESERVED: u8 = 8;

/// Whether the byte is inside the application-defined lossy range.
pub fn is_lossy_id(id: u8) -> bool {
    id >= PACKET_ID_LOSSY_RANGE_START
        && u16::from(id) < u16::from(PACKET_ID_LOSSY_RANGE_START) + u16::from(PACKET_ID_LOSSY_RANGE_SIZE)
}

/// Whether the byte is inside the application-defined lossless range.
pub fn is_lossless_id(id: u8) -> bool {
    id >= PACKET_ID_LOSSLESS_RANGE_START
        && id < PACKET_ID_LOSSLESS_RANGE_START + PACKET_ID_LOSSLESS_RANGE_SIZE
}

/** Sent on every device connection as soon as it is established, and
echoed back. Receiving it promotes the device (and the friend) to online.

Length | Contents
------ | --------
`1`    | `0x18`
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Online;

impl FromBytes for Online {
    named!(from_bytes<Online>, do_parse!(
        tag!([PACKET_ID_ONLINE]) >>
        eof!() >>
        (Online)
    ));
}

impl ToBytes for Online {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_ONLINE)
        )
    }
}

/** Sent when a friend is removed, so that the peer drops the session on
its side too.

Length | Contents
------ | --------
`1`    | `0x19`
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Offline;

impl FromBytes for Offline {
    named!(from_bytes<Offline>, do_parse!(
        tag!([PACKET_ID_OFFLINE]) >>
        eof!() >>
        (Offline)
    ));
}

impl ToBytes for Offline {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_OFFLINE)
        )
    }
}

/** Nickname of the sending friend.

Length      | Contents
----------- | --------
`1`         | `0x30`
`0..=128`   | nickname
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Nickname {
    /// Nickname bytes, expected (but not guaranteed) to be UTF-8.
    pub name: Vec<u8>,
}

impl FromBytes for Nickname {
    named!(from_bytes<Nickname>, do_parse!(
        tag!([PACKET_ID_NICKNAME]) >>
        name: verify!(rest, |n: &[u8]| n.len() <= MAX_NAME_LENGTH) >>
        (Nickname { name: name.to_vec() })
    ));
}

impl ToBytes for Nickname {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_NICKNAME) >>
            gen_slice!(self.name.as_slice())
        )
    }
}

/** Status message of the sending friend.

Length      | Contents
----------- | --------
`1`         | `0x31`
`0..=1007`  | status message
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusMessage {
    /// Status message bytes.
    pub msg: Vec<u8>,
}

impl FromBytes for StatusMessage {
    named!(from_bytes<StatusMessage>, do_parse!(
        tag!([PACKET_ID_STATUSMESSAGE]) >>
        msg: verify!(rest, |m: &[u8]| m.len() <= MAX_STATUSMESSAGE_LENGTH) >>
        (StatusMessage { msg: msg.to_vec() })
    ));
}

impl ToBytes for StatusMessage {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_STATUSMESSAGE) >>
            gen_slice!(self.msg.as_slice())
        )
    }
}

/** User status of the sending friend.

Length | Contents
------ | --------
`1`    | `0x32`
`1`    | status: `0` none, `1` away, `2` busy
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UserStatusUpdate {
    /// New user status.
    pub status: UserStatus,
}

impl FromBytes for UserStatusUpdate {
    named!(from_bytes<UserStatusUpdate>, do_parse!(
        tag!([PACKET_ID_USERSTATUS]) >>
        status: call!(UserStatus::from_bytes) >>
        eof!() >>
        (UserStatusUpdate { status })
    ));
}

impl ToBytes for UserStatusUpdate {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_USERSTATUS) >>
            gen_be_u8!(self.status as u8)
        )
    }
}

/** Typing notification of the sending friend.

Length | Contents
------ | --------
`1`    | `0x33`
`1`    | `0` not typing, anything else typing
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Typing {
    /// Whether the friend is typing.
    pub is_typing: bool,
}

impl FromBytes for Typing {
    named!(from_bytes<Typing>, do_parse!(
        tag!([PACKET_ID_TYPING]) >>
        is_typing: map!(le_u8, |b| b != 0) >>
        eof!() >>
        (Typing { is_typing })
    ));
}

impl ToBytes for Typing {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_TYPING) >>
            gen_be_u8!(self.is_typing as u8)
        )
    }
}

/// Kind of a chat message, encoded into the packet id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// An ordinary text message.
    Normal = 0,
    /// An action ("/me") message.
    Action = 1,
}

impl FromBytes for MessageKind {
    named!(from_bytes<MessageKind>, switch!(le_u8,
        PACKET_ID_MESSAGE => value!(MessageKind::Normal) |
        PACKET_ID_ACTION => value!(MessageKind::Action)
    ));
}

/** A chat message. The kind is folded into the packet id:
`id = 0x40 + kind`.

Length      | Contents
----------- | --------
`1`         | `0x40` or `0x41`
`1..=1372`  | message
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatMessage {
    /// Kind of the message.
    pub kind: MessageKind,
    /// Message bytes.
    pub msg: Vec<u8>,
}

impl FromBytes for ChatMessage {
    named!(from_bytes<ChatMessage>, do_parse!(
        kind: call!(MessageKind::from_bytes) >>
        msg: verify!(rest, |m: &[u8]| !m.is_empty() && m.len() < MAX_CRYPTO_DATA_SIZE) >>
        (ChatMessage { kind, msg: msg.to_vec() })
    ));
}

impl ToBytes for ChatMessage {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_MESSAGE + self.kind as u8) >>
            gen_slice!(self.msg.as_slice())
        )
    }
}

/** Group chat invite. The payload belongs to the group-chat layer and is
forwarded opaquely.

Length  | Contents
------- | --------
`1`     | `0x60`
`1..`   | invite data
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupInvite {
    /// Opaque invite payload.
    pub data: Vec<u8>,
}

impl FromBytes for GroupInvite {
    named!(from_bytes<GroupInvite>, do_parse!(
        tag!([PACKET_ID_INVITE_GROUPCHAT]) >>
        data: verify!(rest, |d: &[u8]| !d.is_empty()) >>
        (GroupInvite { data: data.to_vec() })
    ));
}

impl ToBytes for GroupInvite {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_INVITE_GROUPCHAT) >>
            gen_slice!(self.data.as_slice())
        )
    }
}

/** Media signalling packet; payload belongs to the A/V layer and is
forwarded opaquely.

Length  | Contents
------- | --------
`1`     | `0x45`
`1..`   | MSI payload
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Msi {
    /// Opaque MSI payload.
    pub data: Vec<u8>,
}

impl FromBytes for Msi {
    named!(from_bytes<Msi>, do_parse!(
        tag!([PACKET_ID_MSI]) >>
        data: verify!(rest, |d: &[u8]| !d.is_empty()) >>
        (Msi { data: data.to_vec() })
    ));
}

impl ToBytes for Msi {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_MSI) >>
            gen_slice!(self.data.as_slice())
        )
    }
}

/** Announces a new outgoing file transfer.

Length      | Contents
----------- | --------
`1`         | `0x50`
`1`         | slot index
`4`         | file type (big endian)
`8`         | file size (big endian), `u64::max_value()` = streaming
`32`        | file id
`0..=255`   | filename
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSendRequest {
    /// Slot index chosen by the sender.
    pub file_number: u8,
    /// Application-defined file type.
    pub file_type: u32,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Id of the transfer.
    pub file_id: FileId,
    /// Name of the file.
    pub filename: Vec<u8>,
}

impl FromBytes for FileSendRequest {
    named!(from_bytes<FileSendRequest>, do_parse!(
        tag!([PACKET_ID_FILE_SENDREQUEST]) >>
        file_number: verify!(le_u8, |n| (n as usize) < MAX_CONCURRENT_FILE_PIPES) >>
        file_type: be_u32 >>
        file_size: be_u64 >>
        file_id: call!(FileId::from_bytes) >>
        filename: verify!(rest, |f: &[u8]| f.len() <= MAX_FILENAME_LENGTH) >>
        (FileSendRequest {
            file_number,
            file_type,
            file_size,
            file_id,
            filename: filename.to_vec(),
        })
    ));
}

impl ToBytes for FileSendRequest {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_FILE_SENDREQUEST) >>
            gen_be_u8!(self.file_number) >>
            gen_be_u32!(self.file_type) >>
            gen_be_u64!(self.file_size) >>
            gen_slice!(self.file_id.0) >>
            gen_slice!(self.filename.as_slice())
        )
    }
}

/// Control action carried by a [`FileControl`](./struct.FileControl.html)
/// packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlType {
    /// Accept the transfer, or resume one we paused.
    Accept,
    /// Pause the transfer.
    Pause,
    /// Kill the transfer.
    Kill,
    /// Set the resume position of a not-yet-accepted incoming transfer.
    Seek(u64),
}

impl FromBytes for ControlType {
    named!(from_bytes<ControlType>, switch!(le_u8,
        0 => value!(ControlType::Accept) |
        1 => value!(ControlType::Pause) |
        2 => value!(ControlType::Kill) |
        3 => map!(be_u64, ControlType::Seek)
    ));
}

impl ToBytes for ControlType {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        match *self {
            ControlType::Accept => do_gen!(buf, gen_be_u8!(0)),
            ControlType::Pause => do_gen!(buf, gen_be_u8!(1)),
            ControlType::Kill => do_gen!(buf, gen_be_u8!(2)),
            ControlType::Seek(position) => do_gen!(buf,
                gen_be_u8!(3) >>
                gen_be_u64!(position)
            ),
        }
    }
}

/** Controls a running transfer. The direction byte states which side of
the transfer the packet author is: `0` = author sends the file.

Length | Contents
------ | --------
`1`    | `0x51`
`1`    | direction
`1`    | slot index
`1+`   | control (`3` is followed by an 8-byte position)
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileControl {
    /// Which side of the transfer the author of the packet is.
    pub direction: TransferDirection,
    /// Slot index of the transfer.
    pub file_number: u8,
    /// The control action.
    pub control: ControlType,
}

impl FromBytes for FileControl {
    named!(from_bytes<FileControl>, do_parse!(
        tag!([PACKET_ID_FILE_CONTROL]) >>
        direction: call!(TransferDirection::from_bytes) >>
        file_number: verify!(le_u8, |n| (n as usize) < MAX_CONCURRENT_FILE_PIPES) >>
        control: call!(ControlType::from_bytes) >>
        (FileControl { direction, file_number, control })
    ));
}

impl ToBytes for FileControl {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_FILE_CONTROL) >>
            gen_be_u8!(self.direction as u8) >>
            gen_be_u8!(self.file_number) >>
            gen_call!(|buf, control| ControlType::to_bytes(control, buf), &self.control)
        )
    }
}

/** One chunk of file data. The position is implicit: chunks are strictly
sequential. A chunk shorter than [`MAX_FILE_DATA_SIZE`]
(../file_transfer/constant.MAX_FILE_DATA_SIZE.html) terminates the
transfer.

Length       | Contents
------------ | --------
`1`          | `0x52`
`1`          | slot index
`0..=1371`   | data
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileData {
    /// Slot index of the transfer.
    pub file_number: u8,
    /// Chunk payload.
    pub data: Vec<u8>,
}

impl FromBytes for FileData {
    named!(from_bytes<FileData>, do_parse!(
        tag!([PACKET_ID_FILE_DATA]) >>
        file_number: verify!(le_u8, |n| (n as usize) < MAX_CONCURRENT_FILE_PIPES) >>
        data: verify!(rest, |d: &[u8]| d.len() <= MAX_FILE_DATA_SIZE) >>
        (FileData { file_number, data: data.to_vec() })
    ));
}

impl ToBytes for FileData {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(PACKET_ID_FILE_DATA) >>
            gen_be_u8!(self.file_number) >>
            gen_slice!(self.data.as_slice())
        )
    }
}

/** Messenger packet enum that encapsulates all types of Messenger packets.
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    /// [`Online`](./struct.Online.html) structure.
    Online(Online),
    /// [`Offline`](./struct.Offline.html) structure.
    Offline(Offline),
    /// [`Nickname`](./struct.Nickname.html) structure.
    Nickname(Nickname),
    /// [`StatusMessage`](./struct.StatusMessage.html) structure.
    StatusMessage(StatusMessage),
    /// [`UserStatusUpdate`](./struct.UserStatusUpdate.html) structure.
    UserStatusUpdate(UserStatusUpdate),
    /// [`Typing`](./struct.Typing.html) structure.
    Typing(Typing),
    /// [`ChatMessage`](./struct.ChatMessage.html) structure.
    ChatMessage(ChatMessage),
    /// [`GroupInvite`](./struct.GroupInvite.html) structure.
    GroupInvite(GroupInvite),
    /// [`Msi`](./struct.Msi.html) structure.
    Msi(Msi),
    /// [`FileSendRequest`](./struct.FileSendRequest.html) structure.
    FileSendRequest(FileSendRequest),
    /// [`FileControl`](./struct.FileControl.html) structure.
    FileControl(FileControl),
    /// [`FileData`](./struct.FileData.html) structure.
    FileData(FileData),
}

impl FromBytes for Packet {
    named!(from_bytes<Packet>, alt!(
        map!(Online::from_bytes, Packet::Online) |
        map!(Offline::from_bytes, Packet::Offline) |
        map!(Nickname::from_bytes, Packet::Nickname) |
        map!(StatusMessage::from_bytes, Packet::StatusMessage) |
        map!(UserStatusUpdate::from_bytes, Packet::UserStatusUpdate) |
        map!(Typing::from_bytes, Packet::Typing) |
        map!(ChatMessage::from_bytes, Packet::ChatMessage) |
        map!(GroupInvite::from_bytes, Packet::GroupInvite) |
        map!(Msi::from_bytes, Packet::Msi) |
        map!(FileSendRequest::from_bytes, Packet::FileSendRequest) |
        map!(FileControl::from_bytes, Packet::FileControl) |
        map!(FileData::from_bytes, Packet::FileData)
    ));
}

impl ToBytes for Packet {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        match *self {
            Packet::Online(ref p) => p.to_bytes(buf),
            Packet::Offline(ref p) => p.to_bytes(buf),
            Packet::Nickname(ref p) => p.to_bytes(buf),
            Packet::StatusMessage(ref p) => p.to_bytes(buf),
            Packet::UserStatusUpdate(ref p) => p.to_bytes(buf),
            Packet::Typing(ref p) => p.to_bytes(buf),
            Packet::ChatMessage(ref p) => p.to_bytes(buf),
            Packet::GroupInvite(ref p) => p.to_bytes(buf),
            Packet::Msi(ref p) => p.to_bytes(buf),
            Packet::FileSendRequest(ref p) => p.to_bytes(buf),
            Packet::FileControl(ref p) => p.to_bytes(buf),
            Packet::FileData(ref p) => p.to_bytes(buf),
        }
    }
}
