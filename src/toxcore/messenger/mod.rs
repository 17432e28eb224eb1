/*! The messenger: friend roster, sessions, messaging and file transfers.

A per-friend state machine multiplexed over the shared crypto connection
pool. The host drives it by calling [`tick`](./struct.Messenger.html#method.tick)
roughly 20 times per second and by routing transport events into
`handle_connection_status` / `handle_packet` / `handle_lossy_packet`.

Everything runs on the caller's thread; there are no locks and no blocking
calls. Callbacks fire synchronously within the triggering call and must
not re-enter the messenger — a callback that wants to send (e.g. the chunk
request callback) records what to send and performs the call after the
triggering method returns.
*/

pub mod callbacks;
pub mod errors;
pub mod file_transfer;
pub mod friend;
pub mod packet;
pub mod receipt;

use std::cmp::min;

use toxcore::binary_io::*;
use toxcore::crypto_core::*;
use toxcore::friend_connection::{ConnectionKind, FriendConnections};
use toxcore::net_crypto::{CryptoError, NetCrypto, MAX_CRYPTO_DATA_SIZE};
use toxcore::state_format::*;
use toxcore::time::unix_time;
use toxcore::toxid::ToxId;

use self::callbacks::Callbacks;
use self::errors::*;
use self::file_transfer::*;
use self::friend::*;
use self::packet::*;

/// Minimum interval of `tick` in milliseconds.
pub const MIN_RUN_INTERVAL: u64 = 50;

/// Number of TCP relays remembered in the saved state.
pub const NUM_SAVED_TCP_RELAYS: usize = 8;

/** The messenger core.

Owns the friend roster and both transport handles. Friend and device
numbers handed out by the roster operations stay valid until
`remove_friend`; callbacks carry these indices rather than keys.
*/
pub struct Messenger<NC, FC> {
    net_crypto: NC,
    fr_connections: FC,
    friendlist: Vec<Friend>,
    name: Vec<u8>,
    status_message: Vec<u8>,
    user_status: UserStatus,
    callbacks: Callbacks,
    last_connection_status: ConnectionKind,
    loaded_relays: Vec<::toxcore::packed_node::TcpUdpPackedNode>,
    has_added_relays: bool,
}

impl<NC: NetCrypto, FC: FriendConnections> Messenger<NC, FC> {
    /// Create a messenger with an empty roster on top of the given
    /// transports.
    pub fn new(net_crypto: NC, fr_connections: FC) -> Messenger<NC, FC> {
        Messenger {
            net_crypto,
            fr_connections,
            friendlist: Vec::new(),
            name: Vec::new(),
            status_message: Vec::new(),
            user_status: UserStatus::default(),
            callbacks: Callbacks::new(),
            last_connection_status: ConnectionKind::None,
            loaded_relays: Vec::new(),
            has_added_relays: true,
        }
    }

    /// Callback registration slots.
    pub fn callbacks(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    /// Borrow the transport.
    pub fn net_crypto(&mut self) -> &mut NC {
        &mut self.net_crypto
    }

    /// Borrow the friend connection pool.
    pub fn friend_connections(&mut self) -> &mut FC {
        &mut self.fr_connections
    }

    /// Own address to hand out to others:
    /// `public_key ‖ nospam ‖ checksum`.
    pub fn address(&self) -> ToxId {
        ToxId::new(self.net_crypto.self_public_key(), self.net_crypto.nospam())
    }

    /// Own `NoSpam`.
    pub fn nospam(&self) -> ::toxcore::toxid::NoSpam {
        self.net_crypto.nospam()
    }

    /// Replace own `NoSpam`, invalidating previously handed out
    /// addresses.
    pub fn set_nospam(&mut self, nospam: ::toxcore::toxid::NoSpam) {
        self.net_crypto.set_nospam(nospam);
    }

    // -------------------------------------------------------- roster

    fn friend_valid(&self, friend: u32) -> bool {
        self.friendlist.get(friend as usize)
            .map_or(false, |f| f.status != FriendStatus::NotFriend)
    }

    /// Whether the friend number refers to an occupied roster slot.
    pub fn friend_exists(&self, friend: u32) -> bool {
        self.friend_valid(friend)
    }

    /** Look up `(friend, device)` by any of the friend's device keys.

    Inverse of address registration: registered keys are found, unknown
    keys are `None`.
    */
    pub fn friend_by_pk(&self, real_pk: &PublicKey) -> Option<(u32, u32)> {
        for (i, f) in self.friendlist.iter().enumerate() {
            if f.status == FriendStatus::NotFriend {
                continue
            }
            for (d, dev) in f.devices.iter().enumerate() {
                if dev.status != DeviceStatus::NotDevice && dev.real_pk == *real_pk {
                    return Some((i as u32, d as u32))
                }
            }
        }
        None
    }

    /// Primary public key of the friend.
    pub fn friend_pk(&self, friend: u32) -> Option<PublicKey> {
        if self.friend_valid(friend) {
            Some(self.friendlist[friend as usize].devices[0].real_pk)
        } else {
            None
        }
    }

    /// Number of occupied roster slots.
    pub fn count_friendlist(&self) -> u32 {
        self.friendlist.iter()
            .filter(|f| f.status != FriendStatus::NotFriend)
            .count() as u32
    }

    /// Numbers of all occupied roster slots.
    pub fn copy_friendlist(&self) -> Vec<u32> {
        self.friendlist.iter()
            .enumerate()
            .filter(|&(_, f)| f.status != FriendStatus::NotFriend)
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn init_new_friend(&mut self, real_pk: &PublicKey, status: FriendStatus) -> Result<u32, AddFriendError> {
        let conn_id = self.fr_connections.new_connection(real_pk)
            .map_err(|_| AddFriendError::NoMem)?;

        let device = Device::new(DeviceStatus::Confirmed, *real_pk, conn_id);
        let index = match self.friendlist.iter().position(|f| f.status == FriendStatus::NotFriend) {
            Some(i) => {
                self.friendlist[i] = Friend::new(status, device);
                i as u32
            },
            None => {
                self.friendlist.push(Friend::new(status, device));
                (self.friendlist.len() - 1) as u32
            },
        };

        self.fr_connections.set_callbacks(conn_id, Some((index, 0)));

        if self.fr_connections.is_connected(conn_id) {
            self.friendlist[index as usize].devices[0].status = DeviceStatus::Online;
            self.send_online_packet(index, 0);
        }

        debug!("Added friend {}", index);
        Ok(index)
    }

    /** Add a friend by its 38-byte address along with a greeting message.

    The friend request itself goes out from `tick`. If the key was already
    known as a pending friend with a different nospam, the stored nospam
    is updated and `SetNewNospam` is returned — state has changed even
    though the result is an `Err`.
    */
    pub fn add_friend(&mut self, address: &[u8], message: &[u8]) -> Result<u32, AddFriendError> {
        if message.len() > MAX_FRIEND_REQUEST_DATA_SIZE {
            return Err(AddFriendError::TooLong)
        }

        let id = ToxId::from_address(address)
            .map_err(|_| AddFriendError::BadChecksum)?;

        if message.is_empty() {
            return Err(AddFriendError::NoMessage)
        }

        if id.pk == self.net_crypto.self_public_key() {
            return Err(AddFriendError::OwnKey)
        }

        if let Some((friend, _)) = self.friend_by_pk(&id.pk) {
            let f = &mut self.friendlist[friend as usize];
            if f.status >= FriendStatus::Confirmed {
                return Err(AddFriendError::AlreadySent)
            }
            if f.request_nospam == id.nospam {
                return Err(AddFriendError::AlreadySent)
            }
            f.request_nospam = id.nospam;
            return Err(AddFriendError::SetNewNospam)
        }

        let index = self.init_new_friend(&id.pk, FriendStatus::Added)?;

        {
            let f = &mut self.friendlist[index as usize];
            f.request_timeout = FRIENDREQUEST_TIMEOUT;
            f.info = message.to_vec();
            f.request_nospam = id.nospam;
        }

        Ok(index)
    }

    /// Add a friend by bare public key without sending a friend request.
    /// Used when accepting a request and when loading saved state.
    pub fn add_friend_norequest(&mut self, real_pk: &PublicKey) -> Result<u32, AddFriendError> {
        if self.friend_by_pk(real_pk).is_some() {
            return Err(AddFriendError::AlreadySent)
        }

        if !public_key_valid(real_pk) {
            return Err(AddFriendError::BadChecksum)
        }

        if *real_pk == self.net_crypto.self_public_key() {
            return Err(AddFriendError::OwnKey)
        }

        self.init_new_friend(real_pk, FriendStatus::Confirmed)
    }

    fn init_new_device(&mut self, friend: u32, real_pk: &PublicKey, status: DeviceStatus)
        -> Result<u32, AddDeviceError>
    {
        let conn_id = self.fr_connections.new_connection(real_pk)
            .map_err(|_| AddDeviceError::NoMem)?;

        let dev_index = {
            let f = &mut self.friendlist[friend as usize];
            let free = f.devices.iter()
                .enumerate()
                .skip(1)
                .find(|&(_, d)| d.status == DeviceStatus::NotDevice)
                .map(|(i, _)| i);
            match free {
                Some(i) => {
                    f.devices[i] = Device::new(status, *real_pk, conn_id);
                    i
                },
                None => {
                    f.devices.push(Device::new(status, *real_pk, conn_id));
                    f.devices.len() - 1
                },
            }
        };

        self.fr_connections.set_callbacks(conn_id, Some((friend, dev_index as u32)));

        if self.fr_connections.is_connected(conn_id) {
            self.friendlist[friend as usize].devices[dev_index].status = DeviceStatus::Online;
            self.send_online_packet(friend, dev_index as u32);
        }

        debug!("Added device {} to friend {}", dev_index, friend);
        Ok(dev_index as u32)
    }

    /** Add another device (by its 38-byte address) to a confirmed friend.

    Adding a device to a friend that is not at least confirmed yet returns
    `Invalid`. If the key belongs to a pending friend with a different
    nospam, the stored nospam is updated and `SetNewNospam` is returned.
    */
    pub fn add_device(&mut self, address: &[u8], friend: u32) -> Result<u32, AddDeviceError> {
        let id = ToxId::from_address(address)
            .map_err(|_| AddDeviceError::BadChecksum)?;

        if id.pk == self.net_crypto.self_public_key() {
            return Err(AddDeviceError::OwnKey)
        }

        if let Some((existing, _)) = self.friend_by_pk(&id.pk) {
            let f = &mut self.friendlist[existing as usize];
            if f.status >= FriendStatus::Confirmed {
                return Err(AddDeviceError::AlreadySent)
            }
            if f.request_nospam == id.nospam {
                return Err(AddDeviceError::AlreadySent)
            }
            f.request_nospam = id.nospam;
            return Err(AddDeviceError::SetNewNospam)
        }

        if !self.friend_valid(friend) || self.friendlist[friend as usize].status < FriendStatus::Confirmed {
            return Err(AddDeviceError::Invalid)
        }

        self.init_new_device(friend, &id.pk, DeviceStatus::Pending)
    }

    /// Add a confirmed device by bare key; used when loading saved state.
    fn add_device_confirmed(&mut self, real_pk: &PublicKey, friend: u32) -> Result<u32, AddDeviceError> {
        if !public_key_valid(real_pk) {
            return Err(AddDeviceError::BadChecksum)
        }

        if *real_pk == self.net_crypto.self_public_key() {
            return Err(AddDeviceError::OwnKey)
        }

        if self.friend_by_pk(real_pk).is_some() {
            return Err(AddDeviceError::AlreadySent)
        }

        if !self.friend_valid(friend) || self.friendlist[friend as usize].status < FriendStatus::Confirmed {
            return Err(AddDeviceError::Invalid)
        }

        self.init_new_device(friend, real_pk, DeviceStatus::Confirmed)
    }

    /** Remove a friend.

    Tells connected devices that we are gone with an `Offline` packet,
    tears down every device connection, frees the slot and shrinks the
    roster tail.
    */
    pub fn remove_friend(&mut self, friend: u32) -> Result<(), RemoveFriendError> {
        if !self.friend_valid(friend) {
            return Err(RemoveFriendError::Invalid)
        }

        self.friendlist[friend as usize].receipts.clear();
        self.callbacks.clear_rtp_handlers(friend);

        let devices = self.friendlist[friend as usize].devices.clone();
        for device in devices {
            if device.status == DeviceStatus::NotDevice {
                continue
            }
            self.fr_connections.set_callbacks(device.conn_id, None);
            if self.fr_connections.is_connected(device.conn_id) {
                let crypt = self.fr_connections.crypt_connection_id(device.conn_id);
                let mut buf = [0; 1];
                let (_, size) = Packet::Offline(Offline).to_bytes((&mut buf, 0))
                    .expect("Failed to serialize Offline packet");
                let _ = self.net_crypto.write_cryptpacket(crypt, &buf[..size], false);
            }
            self.fr_connections.kill_connection(device.conn_id);
        }

        self.friendlist[friend as usize] = Friend::default();

        while self.friendlist.last().map_or(false, |f| f.status == FriendStatus::NotFriend) {
            self.friendlist.pop();
        }

        debug!("Removed friend {}", friend);
        Ok(())
    }

    // ------------------------------------------------------- sending

    fn send_to_device(&mut self, friend: u32, device: u32, packet: &Packet, congestion_control: bool)
        -> Result<u32, CryptoError>
    {
        let conn_id = self.friendlist[friend as usize].devices[device as usize].conn_id;
        let crypt = self.fr_connections.crypt_connection_id(conn_id);
        let mut buf = [0; MAX_CRYPTO_DATA_SIZE];
        let (_, size) = packet.to_bytes((&mut buf, 0))
            .expect("Failed to serialize packet");
        self.net_crypto.write_cryptpacket(crypt, &buf[..size], congestion_control)
    }

    /// Write an in-band packet to the primary device of an online friend.
    fn write_packet_online(&mut self, friend: u32, packet: &Packet) -> Result<u32, CryptoError> {
        if !self.friend_valid(friend) || self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(CryptoError::NoConnection)
        }
        self.send_to_device(friend, 0, packet, false)
    }

    fn send_online_packet(&mut self, friend: u32, device: u32) -> bool {
        self.send_to_device(friend, device, &Packet::Online(Online), false).is_ok()
    }

    /** Send a chat message of the given kind.

    The message is written to every online device; one receipt is queued,
    tied to the packet number of the primary (lowest-index) online device.
    Returns the message id the later read receipt will carry.
    */
    pub fn send_message(&mut self, friend: u32, kind: MessageKind, message: &[u8])
        -> Result<u32, SendMessageError>
    {
        if !self.friend_valid(friend) {
            return Err(SendMessageError::InvalidFriend)
        }

        if message.len() >= MAX_CRYPTO_DATA_SIZE {
            return Err(SendMessageError::TooLong)
        }

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(SendMessageError::FriendNotConnected)
        }

        let packet = Packet::ChatMessage(ChatMessage { kind, msg: message.to_vec() });

        let mut primary_packet_num = None;
        for device in 0..self.friendlist[friend as usize].devices.len() as u32 {
            if self.friendlist[friend as usize].devices[device as usize].status != DeviceStatus::Online {
                continue
            }
            match self.send_to_device(friend, device, &packet, false) {
                Ok(packet_num) => {
                    if primary_packet_num.is_none() {
                        primary_packet_num = Some(packet_num);
                    }
                },
                Err(e) => trace!("Message fan-out to device {} of friend {} failed: {:?}", device, friend, e),
            }
        }

        let packet_num = primary_packet_num.ok_or(SendMessageError::QueueFull)?;

        let f = &mut self.friendlist[friend as usize];
        f.message_id += 1;
        let msg_id = f.message_id;
        f.receipts.add(packet_num, msg_id);
        Ok(msg_id)
    }

    /// Forward an opaque group invite to the friend.
    pub fn send_group_invite(&mut self, friend: u32, data: &[u8]) -> Result<(), CustomPacketError> {
        self.send_opaque(friend, data, |data| Packet::GroupInvite(GroupInvite { data }))
    }

    /// Forward an opaque media signalling packet to the friend.
    pub fn send_msi_packet(&mut self, friend: u32, data: &[u8]) -> Result<(), CustomPacketError> {
        self.send_opaque(friend, data, |data| Packet::Msi(Msi { data }))
    }

    fn send_opaque<B>(&mut self, friend: u32, data: &[u8], build: B) -> Result<(), CustomPacketError>
        where B: FnOnce(Vec<u8>) -> Packet
    {
        if !self.friend_valid(friend) {
            return Err(CustomPacketError::InvalidFriend)
        }
        if data.is_empty() || data.len() >= MAX_CRYPTO_DATA_SIZE {
            return Err(CustomPacketError::BadLength)
        }
        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(CustomPacketError::NotConnected)
        }
        self.write_packet_online(friend, &build(data.to_vec()))
            .map(|_| ())
            .map_err(|_| CustomPacketError::SendFailed)
    }

    /// Send an application-defined lossy packet. The first byte of `data`
    /// must lie in the lossy range.
    pub fn send_lossy_packet(&mut self, friend: u32, data: &[u8]) -> Result<(), CustomPacketError> {
        if !self.friend_valid(friend) {
            return Err(CustomPacketError::InvalidFriend)
        }
        if data.is_empty() || data.len() > MAX_CRYPTO_DATA_SIZE {
            return Err(CustomPacketError::BadLength)
        }
        if !is_lossy_id(data[0]) {
            return Err(CustomPacketError::BadId)
        }
        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(CustomPacketError::NotConnected)
        }
        let conn_id = self.friendlist[friend as usize].devices[0].conn_id;
        let crypt = self.fr_connections.crypt_connection_id(conn_id);
        self.net_crypto.send_lossy_cryptpacket(crypt, data)
            .map_err(|_| CustomPacketError::SendFailed)
    }

    /// Send an application-defined lossless packet. The first byte of
    /// `data` must lie in the lossless range.
    pub fn send_lossless_packet(&mut self, friend: u32, data: &[u8]) -> Result<(), CustomPacketError> {
        if !self.friend_valid(friend) {
            return Err(CustomPacketError::InvalidFriend)
        }
        if data.is_empty() || data.len() > MAX_CRYPTO_DATA_SIZE {
            return Err(CustomPacketError::BadLength)
        }
        if !is_lossless_id(data[0]) {
            return Err(CustomPacketError::BadId)
        }
        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(CustomPacketError::NotConnected)
        }
        let conn_id = self.friendlist[friend as usize].devices[0].conn_id;
        let crypt = self.fr_connections.crypt_connection_id(conn_id);
        self.net_crypto.write_cryptpacket(crypt, data, true)
            .map(|_| ())
            .map_err(|_| CustomPacketError::SendFailed)
    }

    /// Register (or with `None` unregister) a handler for one byte code
    /// of the reserved lossy A/V sub-range of the friend.
    pub fn register_rtp_handler(&mut self, friend: u32, byte: u8,
                                handler: Option<Box<FnMut(u32, &[u8])>>)
        -> Result<(), CustomPacketError>
    {
        if !self.friend_valid(friend) {
            return Err(CustomPacketError::InvalidFriend)
        }
        if byte < PACKET_ID_LOSSY_RANGE_START
            || byte >= PACKET_ID_LOSSY_RANGE_START + PACKET_LOSSY_AV_RESERVED
        {
            return Err(CustomPacketError::BadId)
        }
        let key = (friend, byte % PACKET_LOSSY_AV_RESERVED);
        match handler {
            Some(handler) => { self.callbacks.rtp_packet.insert(key, handler); },
            None => { self.callbacks.rtp_packet.remove(&key); },
        }
        Ok(())
    }

    // ------------------------------------------------------- profile

    /// Set own nickname. Setting the current value again is a no-op that
    /// does not cause a re-broadcast.
    pub fn set_name(&mut self, name: &[u8]) -> Result<(), SetInfoError> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(SetInfoError::TooLong)
        }
        if self.name == name {
            return Ok(())
        }
        self.name = name.to_vec();
        for f in &mut self.friendlist {
            f.name_sent = false;
        }
        Ok(())
    }

    /// Own nickname.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Set own status message. Setting the current value again is a
    /// no-op.
    pub fn set_status_message(&mut self, message: &[u8]) -> Result<(), SetInfoError> {
        if message.len() > MAX_STATUSMESSAGE_LENGTH {
            return Err(SetInfoError::TooLong)
        }
        if self.status_message == message {
            return Ok(())
        }
        self.status_message = message.to_vec();
        for f in &mut self.friendlist {
            f.status_message_sent = false;
        }
        Ok(())
    }

    /// Own status message.
    pub fn status_message(&self) -> &[u8] {
        &self.status_message
    }

    /// Set own user status. Setting the current value again is a no-op.
    pub fn set_user_status(&mut self, status: UserStatus) {
        if self.user_status == status {
            return
        }
        self.user_status = status;
        for f in &mut self.friendlist {
            f.user_status_sent = false;
        }
    }

    /// Own user status.
    pub fn user_status(&self) -> UserStatus {
        self.user_status
    }

    /// Set whether we are typing to the friend.
    pub fn set_typing(&mut self, friend: u32, is_typing: bool) -> Result<(), RemoveFriendError> {
        if !self.friend_valid(friend) {
            return Err(RemoveFriendError::Invalid)
        }
        let f = &mut self.friendlist[friend as usize];
        if f.user_is_typing == is_typing {
            return Ok(())
        }
        f.user_is_typing = is_typing;
        f.typing_sent = false;
        Ok(())
    }

    /// Cached nickname of the friend.
    pub fn friend_name(&self, friend: u32) -> Option<&[u8]> {
        if self.friend_valid(friend) {
            Some(&self.friendlist[friend as usize].name)
        } else {
            None
        }
    }

    /// Cached status message of the friend.
    pub fn friend_status_message(&self, friend: u32) -> Option<&[u8]> {
        if self.friend_valid(friend) {
            Some(&self.friendlist[friend as usize].status_message)
        } else {
            None
        }
    }

    /// Cached user status of the friend.
    pub fn friend_user_status(&self, friend: u32) -> Option<UserStatus> {
        if self.friend_valid(friend) {
            Some(self.friendlist[friend as usize].user_status)
        } else {
            None
        }
    }

    /// Whether the friend is typing to us.
    pub fn friend_is_typing(&self, friend: u32) -> Option<bool> {
        if self.friend_valid(friend) {
            Some(self.friendlist[friend as usize].is_typing)
        } else {
            None
        }
    }

    /// When the friend was last seen online, unix seconds.
    pub fn last_online(&self, friend: u32) -> Option<u64> {
        if self.friend_valid(friend) {
            Some(self.friendlist[friend as usize].last_seen_time)
        } else {
            None
        }
    }

    /// Current connection kind of the friend, `None` while it is not
    /// online.
    pub fn connection_status(&self, friend: u32) -> ConnectionKind {
        if !self.friend_valid(friend) || self.friendlist[friend as usize].status != FriendStatus::Online {
            return ConnectionKind::None
        }
        let conn_id = self.friendlist[friend as usize].devices[0].conn_id;
        let crypt = self.fr_connections.crypt_connection_id(conn_id);
        let (direct, num_relays) = self.net_crypto.crypto_connection_status(crypt);
        if direct {
            ConnectionKind::Udp
        } else if num_relays > 0 {
            ConnectionKind::Tcp
        } else {
            ConnectionKind::Unknown
        }
    }

    // -------------------------------------------------- state machine

    fn check_friend_tcp_udp(&mut self, friend: u32) {
        let last = self.friendlist[friend as usize].last_connection_kind;
        let mut kind = self.connection_status(friend);

        if kind == ConnectionKind::Unknown {
            if last == ConnectionKind::Udp {
                // transport lost the relay count for a moment; do not flap
                return
            } else {
                kind = ConnectionKind::Tcp;
            }
        }

        if last != kind {
            if let Some(ref mut cb) = self.callbacks.connection_status {
                cb(friend, kind);
            }
        }

        self.friendlist[friend as usize].last_connection_kind = kind;
    }

    fn check_friend_connectionstatus(&mut self, friend: u32, status: FriendStatus) {
        if status == FriendStatus::NotFriend {
            return
        }

        let was_online = self.friendlist[friend as usize].status == FriendStatus::Online;
        let is_online = status == FriendStatus::Online;

        if is_online != was_online {
            if was_online {
                self.break_files(friend);
                self.friendlist[friend as usize].receipts.clear();
            } else {
                self.friendlist[friend as usize].reset_sent_flags();
            }
            self.friendlist[friend as usize].status = status;
        }

        self.check_friend_tcp_udp(friend);
    }

    fn set_friend_status(&mut self, friend: u32, status: FriendStatus) {
        self.check_friend_connectionstatus(friend, status);
        let f = &mut self.friendlist[friend as usize];
        f.status = status;
        match status {
            FriendStatus::Added | FriendStatus::FrSent => f.devices[0].status = DeviceStatus::Pending,
            FriendStatus::Confirmed => f.devices[0].status = DeviceStatus::Confirmed,
            // only the device that actually completed the handshake goes
            // online; the caller marks it explicitly
            FriendStatus::Online | FriendStatus::NotFriend => (),
        }
    }

    fn set_device_status(&mut self, friend: u32, device: u32, status: DeviceStatus) {
        self.friendlist[friend as usize].devices[device as usize].status = status;
    }

    /// The friend is online iff at least one device is.
    fn demote_friend_if_last_device(&mut self, friend: u32) {
        if self.friendlist[friend as usize].status == FriendStatus::Online
            && !self.friendlist[friend as usize].any_device_online()
        {
            self.set_friend_status(friend, FriendStatus::Confirmed);
        }
    }

    /** A device connection went up or down.

    Wired to the connectivity callback of the friend-connection subsystem.
    */
    pub fn handle_connection_status(&mut self, friend: u32, device: u32, connected: bool) {
        if !self.friend_valid(friend)
            || self.friendlist[friend as usize].devices.len() <= device as usize
        {
            return
        }

        if connected {
            self.set_device_status(friend, device, DeviceStatus::Online);
            self.send_online_packet(friend, device);
        } else if self.friendlist[friend as usize].status == FriendStatus::Online {
            self.set_device_status(friend, device, DeviceStatus::Confirmed);
            self.demote_friend_if_last_device(friend);
        }
    }

    /** A friend request arrived from the intake subsystem. Requests from
    keys that are already in the roster are dropped.
    */
    pub fn handle_friend_request(&mut self, real_pk: &PublicKey, message: &[u8]) {
        if self.friend_by_pk(real_pk).is_some() {
            trace!("Dropping friend request from a key that is already a friend");
            return
        }
        if let Some(ref mut cb) = self.callbacks.friend_request {
            cb(real_pk, message);
        }
    }

    // ------------------------------------------------------ inbound

    /** An in-band packet arrived on a device connection.

    Malformed packets are dropped silently; a control for an unknown file
    transfer triggers a reciprocal kill.
    */
    pub fn handle_packet(&mut self, friend: u32, device: u32, data: &[u8]) {
        if data.is_empty() || !self.friend_valid(friend)
            || self.friendlist[friend as usize].devices.len() <= device as usize
        {
            return
        }

        let id = data[0];

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            if id == PACKET_ID_ONLINE && data.len() == 1 {
                self.set_friend_status(friend, FriendStatus::Online);
                self.set_device_status(friend, device, DeviceStatus::Online);
                self.send_online_packet(friend, device);
            } else {
                trace!("Dropping packet {} from friend {} that is not online", id, friend);
            }
            return
        }

        if is_lossless_id(id) {
            if let Some(ref mut cb) = self.callbacks.lossless_packet {
                cb(friend, data);
            }
            return
        }

        match Packet::from_bytes(data) {
            IResult::Done(_, packet) => self.dispatch_packet(friend, device, packet),
            _ => trace!("Dropping malformed packet {} from friend {}", id, friend),
        }
    }

    fn dispatch_packet(&mut self, friend: u32, device: u32, packet: Packet) {
        match packet {
            Packet::Online(_) => {
                // another device of an online friend came up
                self.set_device_status(friend, device, DeviceStatus::Online);
                self.send_online_packet(friend, device);
            },
            Packet::Offline(_) => {
                self.set_device_status(friend, device, DeviceStatus::Confirmed);
                self.demote_friend_if_last_device(friend);
            },
            Packet::Nickname(p) => {
                // inform of the change before overwriting the old name
                if let Some(ref mut cb) = self.callbacks.name_change {
                    cb(friend, &p.name);
                }
                self.friendlist[friend as usize].name = p.name;
            },
            Packet::StatusMessage(p) => {
                if let Some(ref mut cb) = self.callbacks.status_message_change {
                    cb(friend, &p.msg);
                }
                self.friendlist[friend as usize].status_message = p.msg;
            },
            Packet::UserStatusUpdate(p) => {
                if let Some(ref mut cb) = self.callbacks.user_status_change {
                    cb(friend, p.status);
                }
                self.friendlist[friend as usize].user_status = p.status;
            },
            Packet::Typing(p) => {
                self.friendlist[friend as usize].is_typing = p.is_typing;
                if let Some(ref mut cb) = self.callbacks.typing_change {
                    cb(friend, p.is_typing);
                }
            },
            Packet::ChatMessage(p) => {
                if let Some(ref mut cb) = self.callbacks.friend_message {
                    cb(friend, p.kind, &p.msg);
                }
            },
            Packet::GroupInvite(p) => {
                if let Some(ref mut cb) = self.callbacks.group_invite {
                    cb(friend, &p.data);
                }
            },
            Packet::Msi(p) => {
                if let Some(ref mut cb) = self.callbacks.msi_packet {
                    cb(friend, &p.data);
                }
            },
            Packet::FileSendRequest(p) => self.handle_file_send_request(friend, p),
            Packet::FileControl(p) => self.handle_filecontrol(friend, p),
            Packet::FileData(p) => self.handle_filedata(friend, p),
        }
    }

    /** A lossy packet arrived on a device connection. The reserved
    leading sub-range dispatches to the per-byte RTP handlers of the
    friend, the remainder to the generic lossy callback.
    */
    pub fn handle_lossy_packet(&mut self, friend: u32, _device: u32, data: &[u8]) {
        if data.is_empty() || !self.friend_valid(friend) {
            return
        }

        let id = data[0];
        if id < PACKET_ID_LOSSY_RANGE_START {
            return
        }

        if id < PACKET_ID_LOSSY_RANGE_START + PACKET_LOSSY_AV_RESERVED {
            let key = (friend, id % PACKET_LOSSY_AV_RESERVED);
            if let Some(cb) = self.callbacks.rtp_packet.get_mut(&key) {
                cb(friend, data);
            }
            return
        }

        if let Some(ref mut cb) = self.callbacks.lossy_packet {
            cb(friend, data);
        }
    }

    // -------------------------------------------------- file transfer

    /** Offer a file to the friend.

    Reserves the first free sending slot and announces it. The returned
    slot number is the file number used in all later calls; the transfer
    starts once the friend accepts.
    */
    pub fn new_file_send(&mut self, friend: u32, file_type: u32, file_size: u64,
                         file_id: FileId, filename: &[u8])
        -> Result<u32, FileSendError>
    {
        if !self.friend_valid(friend) {
            return Err(FileSendError::InvalidFriend)
        }

        if filename.len() > MAX_FILENAME_LENGTH {
            return Err(FileSendError::NameTooLong)
        }

        let slot = self.friendlist[friend as usize].file_sending.iter()
            .position(|ft| ft.status == FileStatus::NoTransfer)
            .ok_or(FileSendError::TooManyFiles)?;

        let packet = Packet::FileSendRequest(FileSendRequest {
            file_number: slot as u8,
            file_type,
            file_size,
            file_id,
            filename: filename.to_vec(),
        });
        self.write_packet_online(friend, &packet)
            .map_err(|_| FileSendError::SendFailed)?;

        {
            let f = &mut self.friendlist[friend as usize];
            let ft = &mut f.file_sending[slot];
            ft.status = FileStatus::NotAccepted;
            ft.size = file_size;
            ft.transferred = 0;
            ft.requested = 0;
            ft.slots_allocated = 0;
            ft.paused = Pause::default();
            ft.id = file_id;
            f.num_sending_files += 1;
        }

        Ok(slot as u32)
    }

    /** Issue `Accept`, `Pause` or `Kill` on a transfer. `Seek` goes
    through [`file_seek`](#method.file_seek) and is rejected here.
    */
    pub fn file_control(&mut self, friend: u32, file_number: u32, control: ControlType)
        -> Result<(), FileControlError>
    {
        if !self.friend_valid(friend) {
            return Err(FileControlError::InvalidFriend)
        }

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(FileControlError::FriendNotConnected)
        }

        let (direction, slot) = unpack_file_number(file_number)
            .ok_or(FileControlError::InvalidFile)?;

        let ft = match direction {
            TransferDirection::Sending => self.friendlist[friend as usize].file_sending[slot as usize],
            TransferDirection::Receiving => self.friendlist[friend as usize].file_receiving[slot as usize],
        };

        if ft.status == FileStatus::NoTransfer {
            return Err(FileControlError::InvalidFile)
        }

        match control {
            ControlType::Seek(_) => return Err(FileControlError::BadControl),
            ControlType::Pause => {
                if ft.paused.us || ft.status != FileStatus::Transferring {
                    return Err(FileControlError::AlreadyPaused)
                }
            },
            ControlType::Accept => {
                if ft.status == FileStatus::Transferring {
                    if !ft.paused.us {
                        if ft.paused.other {
                            return Err(FileControlError::NotPausedByUs)
                        } else {
                            return Err(FileControlError::NotPaused)
                        }
                    }
                } else {
                    if ft.status != FileStatus::NotAccepted {
                        return Err(FileControlError::NotPaused)
                    }
                    if direction == TransferDirection::Sending {
                        return Err(FileControlError::NotPausedByUs)
                    }
                }
            },
            ControlType::Kill => (),
        }

        let wire = Packet::FileControl(FileControl { direction, file_number: slot, control });
        self.write_packet_online(friend, &wire)
            .map_err(|_| FileControlError::SendFailed)?;

        {
            let f = &mut self.friendlist[friend as usize];
            let ft = match direction {
                TransferDirection::Sending => &mut f.file_sending[slot as usize],
                TransferDirection::Receiving => &mut f.file_receiving[slot as usize],
            };
            match control {
                ControlType::Kill => {
                    ft.status = FileStatus::NoTransfer;
                    if direction == TransferDirection::Sending {
                        f.num_sending_files -= 1;
                    }
                },
                ControlType::Pause => ft.paused.us = true,
                ControlType::Accept => {
                    ft.status = FileStatus::Transferring;
                    if ft.paused.us {
                        ft.paused.us = false;
                    }
                },
                ControlType::Seek(_) => unreachable!("rejected above"),
            }
        }

        Ok(())
    }

    /** Seek a not-yet-accepted incoming transfer to `position` before
    accepting it, for resuming broken transfers.
    */
    pub fn file_seek(&mut self, friend: u32, file_number: u32, position: u64)
        -> Result<(), FileSeekError>
    {
        if !self.friend_valid(friend) {
            return Err(FileSeekError::InvalidFriend)
        }

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(FileSeekError::FriendNotConnected)
        }

        if file_number < 1 << 16 {
            return Err(FileSeekError::NotSending)
        }

        let (_, slot) = unpack_file_number(file_number)
            .ok_or(FileSeekError::InvalidFile)?;

        let ft = self.friendlist[friend as usize].file_receiving[slot as usize];

        if ft.status == FileStatus::NoTransfer {
            return Err(FileSeekError::InvalidFile)
        }

        if ft.status != FileStatus::NotAccepted {
            return Err(FileSeekError::WrongState)
        }

        if position >= ft.size {
            return Err(FileSeekError::BadPosition)
        }

        let wire = Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: slot,
            control: ControlType::Seek(position),
        });
        self.write_packet_online(friend, &wire)
            .map_err(|_| FileSeekError::SendFailed)?;

        let ft = &mut self.friendlist[friend as usize].file_receiving[slot as usize];
        ft.transferred = position;
        ft.requested = position;
        Ok(())
    }

    /** Send one chunk of file data, answering a chunk request.

    The chunk must continue the stream exactly (`position` equals what has
    been transferred so far) and must be full-sized unless it is the last
    one. Sending the terminating chunk moves the transfer to `Finished`;
    the final zero-length chunk request arrives once the peer acknowledged
    it.
    */
    pub fn file_data(&mut self, friend: u32, file_number: u32, position: u64, data: &[u8])
        -> Result<(), FileDataError>
    {
        if !self.friend_valid(friend) {
            return Err(FileDataError::InvalidFriend)
        }

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(FileDataError::FriendNotConnected)
        }

        let (direction, slot) = unpack_file_number(file_number)
            .ok_or(FileDataError::InvalidFile)?;
        if direction != TransferDirection::Sending {
            return Err(FileDataError::InvalidFile)
        }

        let ft = self.friendlist[friend as usize].file_sending[slot as usize];

        if ft.status != FileStatus::Transferring {
            return Err(FileDataError::NotTransferring)
        }

        if data.len() > MAX_FILE_DATA_SIZE {
            return Err(FileDataError::BadSize)
        }

        if ft.size - ft.transferred < data.len() as u64 {
            return Err(FileDataError::BadSize)
        }

        if ft.size != ::std::u64::MAX
            && data.len() != MAX_FILE_DATA_SIZE
            && ft.transferred + data.len() as u64 != ft.size
        {
            return Err(FileDataError::BadSize)
        }

        if position != ft.transferred || (ft.requested <= position && ft.size != 0) {
            return Err(FileDataError::WrongPosition)
        }

        // keep queue room for messages so bulk data cannot starve them
        {
            let conn_id = self.friendlist[friend as usize].devices[0].conn_id;
            let crypt = self.fr_connections.crypt_connection_id(conn_id);
            if self.net_crypto.num_free_sendqueue_slots(crypt) < MIN_SLOTS_FREE {
                return Err(FileDataError::QueueFull)
            }
        }

        let packet = Packet::FileData(FileData { file_number: slot, data: data.to_vec() });
        let packet_num = self.send_to_device(friend, 0, &packet, true)
            .map_err(|_| FileDataError::QueueFull)?;

        let ft = &mut self.friendlist[friend as usize].file_sending[slot as usize];
        ft.transferred += data.len() as u64;
        if ft.slots_allocated > 0 {
            ft.slots_allocated -= 1;
        }

        if data.len() != MAX_FILE_DATA_SIZE || ft.size == ft.transferred {
            ft.status = FileStatus::Finished;
            ft.last_packet_number = packet_num;
        }

        Ok(())
    }

    /// Id of an active transfer.
    pub fn file_get_id(&self, friend: u32, file_number: u32) -> Result<FileId, FileGetError> {
        if !self.friend_valid(friend) {
            return Err(FileGetError::InvalidFriend)
        }

        if self.friendlist[friend as usize].status != FriendStatus::Online {
            return Err(FileGetError::InvalidFile)
        }

        let (direction, slot) = unpack_file_number(file_number)
            .ok_or(FileGetError::InvalidFile)?;

        let ft = match direction {
            TransferDirection::Sending => &self.friendlist[friend as usize].file_sending[slot as usize],
            TransferDirection::Receiving => &self.friendlist[friend as usize].file_receiving[slot as usize],
        };

        if ft.status == FileStatus::NoTransfer {
            return Err(FileGetError::InvalidFile)
        }

        Ok(ft.id)
    }

    /// Bytes of an active transfer that are still to be sent or received.
    pub fn file_data_remaining(&self, friend: u32, file_number: u32) -> Option<u64> {
        if !self.friend_valid(friend) {
            return None
        }

        let (direction, slot) = unpack_file_number(file_number)?;

        let ft = match direction {
            TransferDirection::Sending => &self.friendlist[friend as usize].file_sending[slot as usize],
            TransferDirection::Receiving => &self.friendlist[friend as usize].file_receiving[slot as usize],
        };

        if ft.status == FileStatus::NoTransfer {
            return None
        }

        Some(ft.size - ft.transferred)
    }

    fn handle_file_send_request(&mut self, friend: u32, p: FileSendRequest) {
        let real_file_number = pack_file_number(TransferDirection::Receiving, p.file_number);
        {
            let ft = &mut self.friendlist[friend as usize].file_receiving[p.file_number as usize];
            if ft.status != FileStatus::NoTransfer {
                trace!("Dropping file send request for busy slot {} of friend {}", p.file_number, friend);
                return
            }
            ft.status = FileStatus::NotAccepted;
            ft.size = p.file_size;
            ft.transferred = 0;
            ft.requested = 0;
            ft.slots_allocated = 0;
            ft.paused = Pause::default();
            ft.id = p.file_id;
        }
        if let Some(ref mut cb) = self.callbacks.file_send_request {
            cb(friend, real_file_number, p.file_type, p.file_size, &p.filename);
        }
    }

    fn handle_filecontrol(&mut self, friend: u32, p: FileControl) {
        // the direction byte is the author's role, so it points at the
        // opposite slot array on our side
        let (our_direction, real_file_number) = match p.direction {
            TransferDirection::Sending =>
                (TransferDirection::Receiving, pack_file_number(TransferDirection::Receiving, p.file_number)),
            TransferDirection::Receiving =>
                (TransferDirection::Sending, pack_file_number(TransferDirection::Sending, p.file_number)),
        };
        let slot = p.file_number as usize;

        let status = match our_direction {
            TransferDirection::Sending => self.friendlist[friend as usize].file_sending[slot].status,
            TransferDirection::Receiving => self.friendlist[friend as usize].file_receiving[slot].status,
        };

        if status == FileStatus::NoTransfer {
            // unknown transfer, tell the other side to kill it
            let reply = Packet::FileControl(FileControl {
                direction: our_direction,
                file_number: p.file_number,
                control: ControlType::Kill,
            });
            let _ = self.write_packet_online(friend, &reply);
            return
        }

        match p.control {
            ControlType::Accept => {
                let accepted = {
                    let ft = self.file_transfer_mut(friend, our_direction, slot);
                    if our_direction == TransferDirection::Sending && ft.status == FileStatus::NotAccepted {
                        ft.status = FileStatus::Transferring;
                        true
                    } else if ft.paused.other {
                        ft.paused.other = false;
                        true
                    } else {
                        false
                    }
                };
                if !accepted {
                    trace!("Dropping stray accept for file {} of friend {}", real_file_number, friend);
                    return
                }
                if let Some(ref mut cb) = self.callbacks.file_control {
                    cb(friend, real_file_number, p.control);
                }
            },
            ControlType::Pause => {
                {
                    let ft = self.file_transfer_mut(friend, our_direction, slot);
                    if ft.paused.other || ft.status != FileStatus::Transferring {
                        trace!("Dropping stray pause for file {} of friend {}", real_file_number, friend);
                        return
                    }
                    ft.paused.other = true;
                }
                if let Some(ref mut cb) = self.callbacks.file_control {
                    cb(friend, real_file_number, p.control);
                }
            },
            ControlType::Kill => {
                if let Some(ref mut cb) = self.callbacks.file_control {
                    cb(friend, real_file_number, p.control);
                }
                let f = &mut self.friendlist[friend as usize];
                match our_direction {
                    TransferDirection::Sending => {
                        f.file_sending[slot].status = FileStatus::NoTransfer;
                        if f.num_sending_files > 0 {
                            f.num_sending_files -= 1;
                        }
                    },
                    TransferDirection::Receiving => {
                        f.file_receiving[slot].status = FileStatus::NoTransfer;
                    },
                }
            },
            ControlType::Seek(position) => {
                // only the receiver may seek, and only before accepting
                let ft = self.file_transfer_mut(friend, our_direction, slot);
                if ft.status != FileStatus::NotAccepted || our_direction != TransferDirection::Sending {
                    trace!("Dropping stray seek for file {} of friend {}", real_file_number, friend);
                    return
                }
                if position >= ft.size {
                    trace!("Dropping out-of-range seek for file {} of friend {}", real_file_number, friend);
                    return
                }
                ft.transferred = position;
                ft.requested = position;
            },
        }
    }

    fn file_transfer_mut(&mut self, friend: u32, direction: TransferDirection, slot: usize) -> &mut FileTransfer {
        let f = &mut self.friendlist[friend as usize];
        match direction {
            TransferDirection::Sending => &mut f.file_sending[slot],
            TransferDirection::Receiving => &mut f.file_receiving[slot],
        }
    }

    fn handle_filedata(&mut self, friend: u32, p: FileData) {
        let slot = p.file_number as usize;
        let real_file_number = pack_file_number(TransferDirection::Receiving, p.file_number);

        let (position, data_len, finished) = {
            let ft = &mut self.friendlist[friend as usize].file_receiving[slot];
            if ft.status != FileStatus::Transferring {
                trace!("Dropping file data for inactive slot {} of friend {}", slot, friend);
                return
            }

            let position = ft.transferred;
            // never deliver more than the announced size
            let mut data_len = p.data.len() as u64;
            if ft.transferred + data_len > ft.size {
                data_len = ft.size - ft.transferred;
            }
            ft.transferred += data_len;

            let finished = data_len == 0
                || ft.transferred >= ft.size
                || (data_len as usize) < MAX_FILE_DATA_SIZE;
            if finished {
                ft.status = FileStatus::NoTransfer;
            }
            (position, data_len as usize, finished)
        };

        if let Some(ref mut cb) = self.callbacks.file_data {
            cb(friend, real_file_number, position, &p.data[..data_len]);
            if finished && data_len != 0 {
                // end-of-stream sentinel
                cb(friend, real_file_number, position + data_len as u64, &[]);
            }
        }
    }

    /// Discard every transfer of the friend, both directions, without
    /// callbacks. Run when the friend disconnects.
    fn break_files(&mut self, friend: u32) {
        let f = &mut self.friendlist[friend as usize];
        for i in 0..MAX_CONCURRENT_FILE_PIPES {
            f.file_sending[i].status = FileStatus::NoTransfer;
            f.file_receiving[i].status = FileStatus::NoTransfer;
        }
        f.num_sending_files = 0;
    }

    fn do_reqchunk_filecb(&mut self, friend: u32) {
        let Messenger {
            ref mut friendlist,
            ref mut callbacks,
            ref mut net_crypto,
            ref fr_connections,
            ..
        } = *self;
        let f = &mut friendlist[friend as usize];

        if f.num_sending_files == 0 {
            return
        }

        let crypt = fr_connections.crypt_connection_id(f.devices[0].conn_id);

        let mut free_slots = net_crypto.num_free_sendqueue_slots(crypt);
        if free_slots < MIN_SLOTS_FREE {
            free_slots = 0;
        } else {
            free_slots -= MIN_SLOTS_FREE;
        }

        let mut num = f.num_sending_files;

        for i in 0..MAX_CONCURRENT_FILE_PIPES {
            if f.file_sending[i].status != FileStatus::NoTransfer {
                num = num.saturating_sub(1);

                if f.file_sending[i].status == FileStatus::Finished
                    && net_crypto.cryptpacket_received(crypt, f.file_sending[i].last_packet_number)
                {
                    // the whole file is on the other side now
                    if let Some(ref mut cb) = callbacks.file_req_chunk {
                        cb(friend, i as u32, f.file_sending[i].transferred, 0);
                    }
                    f.file_sending[i].status = FileStatus::NoTransfer;
                    f.num_sending_files -= 1;
                }

                let allocated = f.file_sending[i].slots_allocated as usize;
                if allocated > free_slots {
                    free_slots = 0;
                } else {
                    free_slots -= allocated;
                }
            }

            while f.file_sending[i].status == FileStatus::Transferring
                && f.file_sending[i].paused.is_none()
            {
                if net_crypto.max_speed_reached(crypt) {
                    free_slots = 0;
                }

                if free_slots == 0 {
                    break
                }

                if f.file_sending[i].size == 0 {
                    // zero length file: a single empty data packet is the
                    // whole stream
                    if net_crypto.num_free_sendqueue_slots(crypt) >= MIN_SLOTS_FREE {
                        let packet = Packet::FileData(FileData {
                            file_number: i as u8,
                            data: Vec::new(),
                        });
                        let mut buf = [0; MAX_CRYPTO_DATA_SIZE];
                        let (_, size) = packet.to_bytes((&mut buf, 0))
                            .expect("Failed to serialize packet");
                        if let Ok(packet_num) = net_crypto.write_cryptpacket(crypt, &buf[..size], true) {
                            f.file_sending[i].status = FileStatus::Finished;
                            f.file_sending[i].last_packet_number = packet_num;
                        }
                    }
                    break
                }

                if f.file_sending[i].size == f.file_sending[i].requested {
                    break
                }

                let length = min(
                    MAX_FILE_DATA_SIZE as u64,
                    f.file_sending[i].size - f.file_sending[i].requested,
                );
                let position = f.file_sending[i].requested;
                f.file_sending[i].requested += length;
                f.file_sending[i].slots_allocated += 1;

                if let Some(ref mut cb) = callbacks.file_req_chunk {
                    cb(friend, i as u32, position, length as usize);
                }

                free_slots -= 1;
            }

            if num == 0 {
                break
            }
        }
    }

    // ---------------------------------------------------------- tick

    fn do_receipts(&mut self, friend: u32) {
        let Messenger {
            ref mut friendlist,
            ref mut callbacks,
            ref net_crypto,
            ref fr_connections,
            ..
        } = *self;
        let f = &mut friendlist[friend as usize];
        let crypt = fr_connections.crypt_connection_id(f.devices[0].conn_id);

        while let Some(receipt) = f.receipts.front() {
            if !net_crypto.cryptpacket_received(crypt, receipt.packet_num) {
                // only a contiguous prefix is ever delivered
                break
            }
            f.receipts.pop_front();
            if let Some(ref mut cb) = callbacks.read_receipt {
                cb(friend, receipt.msg_id);
            }
        }
    }

    fn do_friends(&mut self) {
        let now = unix_time();

        for i in 0..self.friendlist.len() as u32 {
            if self.friendlist[i as usize].status == FriendStatus::Added {
                let (conn_id, nospam, info) = {
                    let f = &self.friendlist[i as usize];
                    (f.devices[0].conn_id, f.request_nospam, f.info.clone())
                };
                if self.fr_connections.send_request_packet(conn_id, nospam, &info).is_ok() {
                    self.set_friend_status(i, FriendStatus::FrSent);
                    self.friendlist[i as usize].request_last_sent = now;
                    debug!("Sent friend request to friend {}", i);
                }
            }

            if self.friendlist[i as usize].status == FriendStatus::FrSent {
                // an unanswered request is assumed lost and re-sent with
                // a doubled timeout
                let expired = {
                    let f = &self.friendlist[i as usize];
                    f.request_last_sent + f.request_timeout < now
                };
                if expired {
                    self.set_friend_status(i, FriendStatus::Added);
                    self.friendlist[i as usize].request_timeout *= 2;
                }
            }

            if self.friendlist[i as usize].status == FriendStatus::Online {
                if !self.friendlist[i as usize].name_sent {
                    let name = self.name.clone();
                    if self.write_packet_online(i, &Packet::Nickname(Nickname { name })).is_ok() {
                        self.friendlist[i as usize].name_sent = true;
                    }
                }

                if !self.friendlist[i as usize].status_message_sent {
                    let msg = self.status_message.clone();
                    if self.write_packet_online(i, &Packet::StatusMessage(StatusMessage { msg })).is_ok() {
                        self.friendlist[i as usize].status_message_sent = true;
                    }
                }

                if !self.friendlist[i as usize].user_status_sent {
                    let status = self.user_status;
                    if self.write_packet_online(i, &Packet::UserStatusUpdate(UserStatusUpdate { status })).is_ok() {
                        self.friendlist[i as usize].user_status_sent = true;
                    }
                }

                if !self.friendlist[i as usize].typing_sent {
                    let is_typing = self.friendlist[i as usize].user_is_typing;
                    if self.write_packet_online(i, &Packet::Typing(Typing { is_typing })).is_ok() {
                        self.friendlist[i as usize].typing_sent = true;
                    }
                }

                self.check_friend_tcp_udp(i);
                self.do_receipts(i);
                self.do_reqchunk_filecb(i);
                self.friendlist[i as usize].last_seen_time = now;
            }
        }
    }

    fn connection_status_cb(&mut self) {
        let status = self.fr_connections.onion_connection_status();
        if status != self.last_connection_status {
            if let Some(ref mut cb) = self.callbacks.core_connection_change {
                cb(status);
            }
            self.last_connection_status = status;
        }
    }

    /** The main loop. Must run at least every [`MIN_RUN_INTERVAL`]
    (./constant.MIN_RUN_INTERVAL.html) milliseconds.

    Drives transport housekeeping, friend request emission with backoff,
    profile re-broadcast after reconnects, receipt reaping, file chunk
    requests and connectivity reporting. Transport errors are absorbed;
    the affected friend simply retries on the next tick.
    */
    pub fn tick(&mut self) {
        if !self.has_added_relays {
            self.has_added_relays = true;
            let relays = ::std::mem::replace(&mut self.loaded_relays, Vec::new());
            for node in &relays {
                self.net_crypto.add_tcp_relay(node);
            }
        }

        self.net_crypto.poll();
        self.fr_connections.poll();
        self.do_friends();
        self.connection_status_cb();
    }

    /// Milliseconds until `tick` should run again.
    pub fn run_interval(&self) -> u64 {
        min(self.net_crypto.run_interval(), MIN_RUN_INTERVAL)
    }

    // --------------------------------------------------- persistence

    fn saved_friends(&self) -> Friends {
        let mut friends = Vec::new();
        for f in &self.friendlist {
            if f.status == FriendStatus::NotFriend {
                continue
            }

            let devices = f.devices.iter()
                .filter(|dev| dev.status != DeviceStatus::NotDevice)
                .map(|dev| SavedDevice {
                    status: dev.status,
                    real_pk: dev.real_pk,
                })
                .collect();

            let record = if f.status < FriendStatus::Confirmed {
                SavedFriend {
                    status: f.status,
                    info: f.info.clone(),
                    name: Vec::new(),
                    status_message: Vec::new(),
                    user_status: UserStatus::default(),
                    nospam: f.request_nospam,
                    last_seen_time: 0,
                    devices,
                }
            } else {
                SavedFriend {
                    status: f.status,
                    info: Vec::new(),
                    name: f.name.clone(),
                    status_message: f.status_message.clone(),
                    user_status: f.user_status,
                    nospam: ::toxcore::toxid::NoSpam([0; 4]),
                    last_seen_time: f.last_seen_time,
                    devices,
                }
            };
            friends.push(record);
        }
        Friends(friends)
    }

    /** Serialize the roster, own profile and the cached relay list.

    Always writes the current multi-device format; the legacy single
    device format is accepted by [`load`](#method.load) but never
    produced.
    */
    pub fn save(&self) -> Vec<u8> {
        let state = State {
            sections: vec![
                Section::Friends(self.saved_friends()),
                Section::Name(Name(self.name.clone())),
                Section::StatusMsg(StatusMsg(self.status_message.clone())),
                Section::Status(Status(self.user_status)),
                Section::TcpRelays(TcpRelays(
                    self.net_crypto.connected_tcp_relays(NUM_SAVED_TCP_RELAYS)
                )),
                Section::Eof(Eof),
            ],
        };

        let mut buf = vec![0; state.buf_len()];
        let (_, size) = state.to_bytes((&mut buf, 0))
            .expect("Failed to serialize state");
        buf.truncate(size);
        buf
    }

    fn load_friend_profile(&mut self, friend: u32, name: &[u8], status_message: &[u8],
                           user_status: UserStatus, last_seen_time: u64)
    {
        let f = &mut self.friendlist[friend as usize];
        if !name.is_empty() && name.len() <= MAX_NAME_LENGTH {
            f.name = name.to_vec();
        }
        if status_message.len() <= MAX_STATUSMESSAGE_LENGTH {
            f.status_message = status_message.to_vec();
        }
        f.user_status = user_status;
        f.last_seen_time = last_seen_time;
    }

    fn load_pending_friend(&mut self, real_pk: &PublicKey, nospam: ::toxcore::toxid::NoSpam, info: &[u8]) {
        // reconstruct the 38-byte address the request was aimed at
        let id = ToxId::new(*real_pk, nospam);
        let mut address = [0; ::toxcore::toxid::TOXIDBYTES];
        let ok = id.to_bytes((&mut address, 0)).is_ok();
        if !ok {
            return
        }
        if let Err(e) = self.add_friend(&address, info) {
            warn!("Skipping saved pending friend: {:?}", e);
        }
    }

    fn load_friends(&mut self, friends: Friends) {
        for record in friends.0 {
            if record.devices.is_empty() {
                // corrupted record
                warn!("Skipping saved friend without devices");
                continue
            }

            if record.status >= FriendStatus::Confirmed {
                let primary_pk = record.devices[0].real_pk;
                let friend = match self.add_friend_norequest(&primary_pk) {
                    Ok(friend) => friend,
                    Err(e) => {
                        warn!("Skipping saved friend: {:?}", e);
                        continue
                    },
                };
                self.load_friend_profile(friend, &record.name, &record.status_message,
                                         record.user_status, record.last_seen_time);
                for dev in &record.devices[1..] {
                    if dev.status != DeviceStatus::NotDevice && public_key_valid(&dev.real_pk) {
                        if let Err(e) = self.add_device_confirmed(&dev.real_pk, friend) {
                            warn!("Skipping saved device: {:?}", e);
                        }
                    }
                }
            } else if record.status != FriendStatus::NotFriend {
                let primary_pk = record.devices[0].real_pk;
                self.load_pending_friend(&primary_pk, record.nospam, &record.info);
            }
        }
    }

    fn load_old_friends(&mut self, friends: OldFriends) {
        for record in friends.0 {
            if record.status >= FriendStatus::Confirmed {
                let friend = match self.add_friend_norequest(&record.pk) {
                    Ok(friend) => friend,
                    Err(e) => {
                        warn!("Skipping saved friend: {:?}", e);
                        continue
                    },
                };
                self.load_friend_profile(friend, &record.name, &record.status_message,
                                         record.user_status, record.last_seen);
            } else if record.status != FriendStatus::NotFriend {
                self.load_pending_friend(&record.pk, record.nospam, &record.info);
            }
        }
    }

    /** Restore a state produced by [`save`](#method.save) (or by a
    pre-multi-device version of it) into this messenger.

    Friend numbers are assigned afresh in save order. Cached relays are
    handed to the transport on the next `tick`.
    */
    pub fn load(&mut self, data: &[u8]) -> Result<(), StateLoadError> {
        let state = match State::from_bytes(data) {
            IResult::Done(_, state) => state,
            IResult::Incomplete(needed) =>
                return Err(StateLoadError::Incomplete { needed }),
            IResult::Error(error) =>
                return Err(StateLoadError::Deserialize { error }),
        };

        for section in state.sections {
            match section {
                Section::Friends(friends) => self.load_friends(friends),
                Section::OldFriends(friends) => self.load_old_friends(friends),
                Section::Name(Name(name)) => {
                    if !name.is_empty() && name.len() <= MAX_NAME_LENGTH {
                        let _ = self.set_name(&name);
                    }
                },
                Section::StatusMsg(StatusMsg(msg)) => {
                    if !msg.is_empty() && msg.len() <= MAX_STATUSMESSAGE_LENGTH {
                        let _ = self.set_status_message(&msg);
                    }
                },
                Section::Status(Status(status)) => self.set_user_status(status),
                Section::TcpRelays(TcpRelays(mut nodes)) => {
                    nodes.truncate(NUM_SAVED_TCP_RELAYS);
                    self.loaded_relays = nodes;
                    self.has_added_relays = false;
                },
                Section::Eof(_) => break,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    use toxcore::friend_connection::ConnectionError;
    use toxcore::packed_node::{IpPort, ProtocolType, TcpUdpPackedNode};
    use toxcore::toxid::{NoSpam, TOXIDBYTES};

    struct MockConn {
        pk: PublicKey,
        connected: bool,
        target: Option<(u32, u32)>,
        killed: bool,
    }

    struct MockState {
        self_pk: PublicKey,
        nospam: NoSpam,
        /// Reliable packets written so far: `(crypt conn id, bytes)`.
        packets: Vec<(usize, Vec<u8>)>,
        lossy_packets: Vec<(usize, Vec<u8>)>,
        next_packet_num: u32,
        acked: HashSet<u32>,
        free_slots: usize,
        max_speed: bool,
        queue_full: bool,
        conns: Vec<MockConn>,
        requests: Vec<(usize, NoSpam, Vec<u8>)>,
        request_fails: bool,
        onion_status: ConnectionKind,
        added_relays: Vec<TcpUdpPackedNode>,
        connected_relays: Vec<TcpUdpPackedNode>,
        conn_statuses: HashMap<usize, (bool, u32)>,
    }

    impl MockState {
        fn new() -> MockState {
            MockState {
                self_pk: gen_keypair().0,
                nospam: NoSpam([1, 2, 3, 4]),
                packets: Vec::new(),
                lossy_packets: Vec::new(),
                next_packet_num: 0,
                acked: HashSet::new(),
                free_slots: 1024,
                max_speed: false,
                queue_full: false,
                conns: Vec::new(),
                requests: Vec::new(),
                request_fails: false,
                onion_status: ConnectionKind::None,
                added_relays: Vec::new(),
                connected_relays: Vec::new(),
                conn_statuses: HashMap::new(),
            }
        }

        /// First bytes (packet ids) of all reliable packets written so
        /// far.
        fn packet_ids(&self) -> Vec<u8> {
            self.packets.iter().map(|&(_, ref p)| p[0]).collect()
        }
    }

    #[derive(Clone)]
    struct MockNetCrypto(Rc<RefCell<MockState>>);

    impl NetCrypto for MockNetCrypto {
        fn self_public_key(&self) -> PublicKey {
            self.0.borrow().self_pk
        }
        fn nospam(&self) -> NoSpam {
            self.0.borrow().nospam
        }
        fn set_nospam(&mut self, nospam: NoSpam) {
            self.0.borrow_mut().nospam = nospam;
        }
        fn write_cryptpacket(&mut self, conn_id: usize, packet: &[u8], _congestion_control: bool)
            -> Result<u32, CryptoError>
        {
            let mut state = self.0.borrow_mut();
            if state.queue_full {
                return Err(CryptoError::QueueFull)
            }
            let num = state.next_packet_num;
            state.next_packet_num += 1;
            state.packets.push((conn_id, packet.to_vec()));
            Ok(num)
        }
        fn cryptpacket_received(&self, _conn_id: usize, packet_num: u32) -> bool {
            self.0.borrow().acked.contains(&packet_num)
        }
        fn num_free_sendqueue_slots(&self, _conn_id: usize) -> usize {
            self.0.borrow().free_slots
        }
        fn max_speed_reached(&self, _conn_id: usize) -> bool {
            self.0.borrow().max_speed
        }
        fn send_lossy_cryptpacket(&mut self, conn_id: usize, packet: &[u8]) -> Result<(), CryptoError> {
            let mut state = self.0.borrow_mut();
            if state.queue_full {
                return Err(CryptoError::QueueFull)
            }
            state.lossy_packets.push((conn_id, packet.to_vec()));
            Ok(())
        }
        fn crypto_connection_status(&self, conn_id: usize) -> (bool, u32) {
            self.0.borrow().conn_statuses.get(&conn_id).cloned().unwrap_or((false, 0))
        }
        fn add_tcp_relay(&mut self, node: &TcpUdpPackedNode) {
            self.0.borrow_mut().added_relays.push(*node);
        }
        fn connected_tcp_relays(&self, max: usize) -> Vec<TcpUdpPackedNode> {
            self.0.borrow().connected_relays.iter().cloned().take(max).collect()
        }
        fn run_interval(&self) -> u64 {
            200
        }
        fn poll(&mut self) {
        }
    }

    #[derive(Clone)]
    struct MockFriendConnections(Rc<RefCell<MockState>>);

    impl FriendConnections for MockFriendConnections {
        fn new_connection(&mut self, real_pk: &PublicKey) -> Result<usize, ConnectionError> {
            let mut state = self.0.borrow_mut();
            state.conns.push(MockConn {
                pk: *real_pk,
                connected: false,
                target: None,
                killed: false,
            });
            Ok(state.conns.len() - 1)
        }
        fn kill_connection(&mut self, conn: usize) {
            self.0.borrow_mut().conns[conn].killed = true;
        }
        fn is_connected(&self, conn: usize) -> bool {
            let state = self.0.borrow();
            !state.conns[conn].killed && state.conns[conn].connected
        }
        fn crypt_connection_id(&self, conn: usize) -> usize {
            conn
        }
        fn set_callbacks(&mut self, conn: usize, target: Option<(u32, u32)>) {
            self.0.borrow_mut().conns[conn].target = target;
        }
        fn send_request_packet(&mut self, conn: usize, nospam: NoSpam, message: &[u8])
            -> Result<(), ConnectionError>
        {
            let mut state = self.0.borrow_mut();
            if state.request_fails {
                return Err(ConnectionError::SendFailed)
            }
            state.requests.push((conn, nospam, message.to_vec()));
            Ok(())
        }
        fn onion_connection_status(&self) -> ConnectionKind {
            self.0.borrow().onion_status
        }
        fn poll(&mut self) {
        }
    }

    type TestMessenger = Messenger<MockNetCrypto, MockFriendConnections>;

    fn create_messenger() -> (TestMessenger, Rc<RefCell<MockState>>) {
        crypto_init();
        let state = Rc::new(RefCell::new(MockState::new()));
        let messenger = Messenger::new(
            MockNetCrypto(state.clone()),
            MockFriendConnections(state.clone()),
        );
        (messenger, state)
    }

    fn address_bytes(pk: &PublicKey, nospam: NoSpam) -> Vec<u8> {
        let id = ToxId::new(*pk, nospam);
        let mut buf = [0; TOXIDBYTES];
        let (_, size) = id.to_bytes((&mut buf, 0))
            .expect("failed to serialize address");
        buf[..size].to_vec()
    }

    fn packet_bytes(packet: &Packet) -> Vec<u8> {
        let mut buf = [0; MAX_CRYPTO_DATA_SIZE];
        let (_, size) = packet.to_bytes((&mut buf, 0))
            .expect("failed to serialize packet");
        buf[..size].to_vec()
    }

    /// Add a friend without a request and walk it through the ONLINE
    /// handshake on its primary device.
    fn add_online_friend(m: &mut TestMessenger, state: &Rc<RefCell<MockState>>) -> u32 {
        let pk = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk)
            .expect("failed to add friend");
        let conn = m.friendlist[friend as usize].devices[0].conn_id;
        state.borrow_mut().conns[conn].connected = true;
        m.handle_connection_status(friend, 0, true);
        m.handle_packet(friend, 0, &[PACKET_ID_ONLINE]);
        assert_eq!(m.friendlist[friend as usize].status, FriendStatus::Online);
        friend
    }

    #[test]
    fn add_friend_and_send_request() {
        let (mut m, state) = create_messenger();
        let friend_pk = gen_keypair().0;
        let address = address_bytes(&friend_pk, NoSpam::from(0xdead_beef));

        let friend = m.add_friend(&address, b"hi").unwrap();
        assert_eq!(friend, 0);
        assert_eq!(m.friendlist[0].status, FriendStatus::Added);
        assert!(m.friend_exists(0));
        assert_eq!(m.friend_by_pk(&friend_pk), Some((0, 0)));
        assert_eq!(m.friend_pk(0), Some(friend_pk));

        m.tick();
        assert_eq!(m.friendlist[0].status, FriendStatus::FrSent);
        {
            let state = state.borrow();
            assert_eq!(state.requests.len(), 1);
            assert_eq!(state.requests[0].1, NoSpam::from(0xdead_beef));
            assert_eq!(state.requests[0].2, b"hi".to_vec());
        }

        // adding the same address again is refused
        assert_eq!(m.add_friend(&address, b"hi"), Err(AddFriendError::AlreadySent));

        // same key with a new nospam updates the pending request
        let address2 = address_bytes(&friend_pk, NoSpam::from(0x1122_3344));
        assert_eq!(m.add_friend(&address2, b"hi"), Err(AddFriendError::SetNewNospam));
        assert_eq!(m.friendlist[0].request_nospam, NoSpam::from(0x1122_3344));
        assert_eq!(m.count_friendlist(), 1);
    }

    #[test]
    fn add_friend_rejects_bad_input() {
        let (mut m, state) = create_messenger();
        let pk = gen_keypair().0;
        let address = address_bytes(&pk, NoSpam::from(7));

        assert_eq!(m.add_friend(&address, b""), Err(AddFriendError::NoMessage));
        assert_eq!(m.add_friend(&address, &[0; MAX_FRIEND_REQUEST_DATA_SIZE + 1]),
                   Err(AddFriendError::TooLong));

        let mut broken = address.clone();
        broken[36] = !broken[36];
        assert_eq!(m.add_friend(&broken, b"hi"), Err(AddFriendError::BadChecksum));

        let own_pk = state.borrow().self_pk;
        let own_address = address_bytes(&own_pk, NoSpam::from(7));
        assert_eq!(m.add_friend(&own_address, b"hi"), Err(AddFriendError::OwnKey));

        assert_eq!(m.count_friendlist(), 0);
    }

    #[test]
    fn friend_request_times_out_with_backoff() {
        let (mut m, _state) = create_messenger();
        let address = address_bytes(&gen_keypair().0, NoSpam::from(42));
        let friend = m.add_friend(&address, b"hello").unwrap();

        m.tick();
        assert_eq!(m.friendlist[0].status, FriendStatus::FrSent);
        assert_eq!(m.friendlist[0].request_timeout, FRIENDREQUEST_TIMEOUT);

        // pretend the request went out long ago
        m.friendlist[friend as usize].request_last_sent =
            unix_time() - FRIENDREQUEST_TIMEOUT - 1;
        m.tick();
        assert_eq!(m.friendlist[0].status, FriendStatus::Added);
        assert_eq!(m.friendlist[0].request_timeout, 2 * FRIENDREQUEST_TIMEOUT);

        // the next tick tries again
        m.tick();
        assert_eq!(m.friendlist[0].status, FriendStatus::FrSent);
    }

    #[test]
    fn online_handshake() {
        let (mut m, state) = create_messenger();
        let pk = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk).unwrap();
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);

        let conn = m.friendlist[0].devices[0].conn_id;
        assert_eq!(state.borrow().conns[conn].pk, pk);
        assert_eq!(state.borrow().conns[conn].target, Some((friend, 0)));
        state.borrow_mut().conns[conn].connected = true;
        m.handle_connection_status(friend, 0, true);

        // the device is online and announced itself, the friend is not
        // promoted until the peer answers
        assert_eq!(m.friendlist[0].devices[0].status, DeviceStatus::Online);
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
        assert_eq!(state.borrow().packet_ids(), vec![PACKET_ID_ONLINE]);

        m.handle_packet(friend, 0, &[PACKET_ID_ONLINE]);
        assert_eq!(m.friendlist[0].status, FriendStatus::Online);
        assert!(m.friendlist[0].any_device_online());
        assert_eq!(state.borrow().packet_ids(), vec![PACKET_ID_ONLINE, PACKET_ID_ONLINE]);
    }

    #[test]
    fn packets_before_online_are_dropped() {
        let (mut m, state) = create_messenger();
        let pk = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk).unwrap();

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_c = received.clone();
        m.callbacks().friend_message = Some(Box::new(move |_friend, _kind, msg: &[u8]| {
            received_c.borrow_mut().push(msg.to_vec());
        }));

        let message = packet_bytes(&Packet::ChatMessage(ChatMessage {
            kind: MessageKind::Normal,
            msg: b"early".to_vec(),
        }));
        m.handle_packet(friend, 0, &message);
        assert!(received.borrow().is_empty());
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
        assert!(state.borrow().packets.is_empty());
    }

    #[test]
    fn send_message_receipts() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_c = received.clone();
        m.callbacks().read_receipt = Some(Box::new(move |friend, msg_id| {
            received_c.borrow_mut().push((friend, msg_id));
        }));

        let first_num = state.borrow().next_packet_num;
        let msg_id = m.send_message(friend, MessageKind::Normal, b"hello").unwrap();
        assert_eq!(msg_id, 1);
        let msg_id2 = m.send_message(friend, MessageKind::Normal, b"world").unwrap();
        assert_eq!(msg_id2, 2);
        assert_eq!(m.friendlist[0].receipts.len(), 2);

        // nothing acked yet
        m.tick();
        assert!(received.borrow().is_empty());

        // acking only the second message delivers nothing: the queue
        // drains a contiguous prefix only
        state.borrow_mut().acked.insert(first_num + 1);
        m.tick();
        assert!(received.borrow().is_empty());

        // acking the first one releases both receipts in send order
        state.borrow_mut().acked.insert(first_num);
        m.tick();
        assert_eq!(*received.borrow(), vec![(friend, 1), (friend, 2)]);
        assert!(m.friendlist[0].receipts.is_empty());
    }

    #[test]
    fn send_message_errors() {
        let (mut m, state) = create_messenger();
        assert_eq!(m.send_message(0, MessageKind::Normal, b"x"),
                   Err(SendMessageError::InvalidFriend));

        let pk = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk).unwrap();
        assert_eq!(m.send_message(friend, MessageKind::Normal, b"x"),
                   Err(SendMessageError::FriendNotConnected));

        let friend = add_online_friend(&mut m, &state);
        assert_eq!(m.send_message(friend, MessageKind::Normal, &[0; MAX_CRYPTO_DATA_SIZE]),
                   Err(SendMessageError::TooLong));

        state.borrow_mut().queue_full = true;
        assert_eq!(m.send_message(friend, MessageKind::Normal, b"x"),
                   Err(SendMessageError::QueueFull));
        state.borrow_mut().queue_full = false;

        // failed sends never consume message ids
        assert_eq!(m.send_message(friend, MessageKind::Normal, b"x"), Ok(1));
    }

    #[test]
    fn inbound_profile_and_message_packets() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let names = Rc::new(RefCell::new(Vec::new()));
        let names_c = names.clone();
        m.callbacks().name_change = Some(Box::new(move |_friend, name: &[u8]| {
            names_c.borrow_mut().push(name.to_vec());
        }));
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let statuses_c = statuses.clone();
        m.callbacks().user_status_change = Some(Box::new(move |_friend, status| {
            statuses_c.borrow_mut().push(status);
        }));
        let typing = Rc::new(RefCell::new(Vec::new()));
        let typing_c = typing.clone();
        m.callbacks().typing_change = Some(Box::new(move |_friend, is_typing| {
            typing_c.borrow_mut().push(is_typing);
        }));
        let messages = Rc::new(RefCell::new(Vec::new()));
        let messages_c = messages.clone();
        m.callbacks().friend_message = Some(Box::new(move |_friend, kind, msg: &[u8]| {
            messages_c.borrow_mut().push((kind, msg.to_vec()));
        }));
        let invites = Rc::new(RefCell::new(Vec::new()));
        let invites_c = invites.clone();
        m.callbacks().group_invite = Some(Box::new(move |_friend, data: &[u8]| {
            invites_c.borrow_mut().push(data.to_vec());
        }));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::Nickname(Nickname {
            name: b"carol".to_vec(),
        })));
        assert_eq!(*names.borrow(), vec![b"carol".to_vec()]);
        assert_eq!(m.friend_name(friend), Some(&b"carol"[..]));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::StatusMessage(StatusMessage {
            msg: b"out fishing".to_vec(),
        })));
        assert_eq!(m.friend_status_message(friend), Some(&b"out fishing"[..]));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::UserStatusUpdate(UserStatusUpdate {
            status: UserStatus::Busy,
        })));
        assert_eq!(*statuses.borrow(), vec![UserStatus::Busy]);
        assert_eq!(m.friend_user_status(friend), Some(UserStatus::Busy));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::Typing(Typing { is_typing: true })));
        assert_eq!(*typing.borrow(), vec![true]);
        assert_eq!(m.friend_is_typing(friend), Some(true));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::ChatMessage(ChatMessage {
            kind: MessageKind::Action,
            msg: b"waves".to_vec(),
        })));
        assert_eq!(*messages.borrow(), vec![(MessageKind::Action, b"waves".to_vec())]);

        m.handle_packet(friend, 0, &packet_bytes(&Packet::GroupInvite(GroupInvite {
            data: vec![1, 2, 3],
        })));
        assert_eq!(*invites.borrow(), vec![vec![1, 2, 3]]);

        // malformed packets are dropped without effect
        m.handle_packet(friend, 0, &[PACKET_ID_USERSTATUS, 9]);
        assert_eq!(*statuses.borrow(), vec![UserStatus::Busy]);
        m.handle_packet(friend, 0, &[]);
        m.handle_packet(friend, 0, &[99, 1, 2]);
    }

    #[test]
    fn file_send_and_chunk_requests() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        m.tick();
        state.borrow_mut().packets.clear();

        let requests = Rc::new(RefCell::new(Vec::new()));
        let requests_c = requests.clone();
        m.callbacks().file_req_chunk = Some(Box::new(move |_friend, file_number, position, length| {
            requests_c.borrow_mut().push((file_number, position, length));
        }));

        let size = 3 * MAX_FILE_DATA_SIZE as u64 + 100;
        let file_id = FileId::new();
        let file_number = m.new_file_send(friend, 0, size, file_id, b"x").unwrap();
        assert_eq!(file_number, 0);
        assert_eq!(state.borrow().packet_ids(), vec![PACKET_ID_FILE_SENDREQUEST]);
        assert_eq!(m.friendlist[0].num_sending_files, 1);
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NotAccepted);
        assert_eq!(m.file_get_id(friend, file_number), Ok(file_id));
        assert_eq!(m.file_data_remaining(friend, file_number), Some(size));

        // no chunks are requested before the peer accepts
        m.tick();
        assert!(requests.borrow().is_empty());

        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Accept,
        })));
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::Transferring);

        // budget: free slots minus the reserved ones bound the requests
        // in flight
        state.borrow_mut().free_slots = MIN_SLOTS_FREE + 4;
        m.tick();
        {
            let requests = requests.borrow();
            assert_eq!(*requests, vec![
                (0, 0, MAX_FILE_DATA_SIZE),
                (0, MAX_FILE_DATA_SIZE as u64, MAX_FILE_DATA_SIZE),
                (0, 2 * MAX_FILE_DATA_SIZE as u64, MAX_FILE_DATA_SIZE),
                (0, 3 * MAX_FILE_DATA_SIZE as u64, 100),
            ]);
        }
        assert_eq!(m.friendlist[0].file_sending[0].slots_allocated, 4);
        assert_eq!(m.friendlist[0].file_sending[0].requested, size);

        // feed the chunks back in order
        let chunk = vec![7; MAX_FILE_DATA_SIZE];
        m.file_data(friend, file_number, 0, &chunk).unwrap();
        m.file_data(friend, file_number, MAX_FILE_DATA_SIZE as u64, &chunk).unwrap();
        assert_eq!(m.file_data(friend, file_number, 0, &chunk),
                   Err(FileDataError::WrongPosition));
        m.file_data(friend, file_number, 2 * MAX_FILE_DATA_SIZE as u64, &chunk).unwrap();
        let last_num = state.borrow().next_packet_num;
        m.file_data(friend, file_number, 3 * MAX_FILE_DATA_SIZE as u64, &vec![7; 100]).unwrap();
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::Finished);
        assert_eq!(m.friendlist[0].file_sending[0].slots_allocated, 0);

        // once the terminating packet is acked the transfer is reaped
        // with a zero length chunk request
        requests.borrow_mut().clear();
        state.borrow_mut().acked.insert(last_num);
        m.tick();
        assert_eq!(*requests.borrow(), vec![(0, size, 0)]);
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NoTransfer);
        assert_eq!(m.friendlist[0].num_sending_files, 0);
        assert_eq!(m.file_data_remaining(friend, file_number), None);
    }

    #[test]
    fn incoming_seek_repositions_pending_send() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        m.tick();

        let size = 2 * 1024 * 1024;
        m.new_file_send(friend, 0, size, FileId::new(), b"bigfile").unwrap();

        let requests = Rc::new(RefCell::new(Vec::new()));
        let requests_c = requests.clone();
        m.callbacks().file_req_chunk = Some(Box::new(move |_friend, file_number, position, length| {
            requests_c.borrow_mut().push((file_number, position, length));
        }));

        // the receiver seeks before accepting
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Seek(1024 * 1024),
        })));
        assert_eq!(m.friendlist[0].file_sending[0].transferred, 1024 * 1024);
        assert_eq!(m.friendlist[0].file_sending[0].requested, 1024 * 1024);
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NotAccepted);

        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Accept,
        })));
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::Transferring);

        // the first chunk request starts at the seeked offset
        state.borrow_mut().free_slots = MIN_SLOTS_FREE + 1;
        m.tick();
        assert_eq!(*requests.borrow(), vec![(0, 1024 * 1024, MAX_FILE_DATA_SIZE)]);
    }

    #[test]
    fn file_control_pause_resume_kill() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let size = 10 * MAX_FILE_DATA_SIZE as u64;
        let file_number = m.new_file_send(friend, 0, size, FileId::new(), b"f").unwrap();
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Accept,
        })));

        m.file_control(friend, file_number, ControlType::Pause).unwrap();
        assert!(m.friendlist[0].file_sending[0].paused.us);
        assert_eq!(m.file_control(friend, file_number, ControlType::Pause),
                   Err(FileControlError::AlreadyPaused));

        m.file_control(friend, file_number, ControlType::Accept).unwrap();
        assert!(m.friendlist[0].file_sending[0].paused.is_none());
        assert_eq!(m.file_control(friend, file_number, ControlType::Accept),
                   Err(FileControlError::NotPaused));

        // a pause held by the peer cannot be lifted from our side
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Pause,
        })));
        assert!(m.friendlist[0].file_sending[0].paused.other);
        assert_eq!(m.file_control(friend, file_number, ControlType::Accept),
                   Err(FileControlError::NotPausedByUs));

        assert_eq!(m.file_control(friend, file_number, ControlType::Seek(0)),
                   Err(FileControlError::BadControl));

        m.file_control(friend, file_number, ControlType::Kill).unwrap();
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NoTransfer);
        assert_eq!(m.friendlist[0].num_sending_files, 0);
        assert_eq!(m.file_control(friend, file_number, ControlType::Kill),
                   Err(FileControlError::InvalidFile));
    }

    #[test]
    fn receive_file_and_data() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let offers = Rc::new(RefCell::new(Vec::new()));
        let offers_c = offers.clone();
        m.callbacks().file_send_request = Some(Box::new(move |_friend, file_number, file_type, size, name: &[u8]| {
            offers_c.borrow_mut().push((file_number, file_type, size, name.to_vec()));
        }));
        let datas = Rc::new(RefCell::new(Vec::new()));
        let datas_c = datas.clone();
        m.callbacks().file_data = Some(Box::new(move |_friend, file_number, position, data: &[u8]| {
            datas_c.borrow_mut().push((file_number, position, data.to_vec()));
        }));

        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileSendRequest(FileSendRequest {
            file_number: 0,
            file_type: 1,
            file_size: 5,
            file_id: FileId([9; FILE_ID_LENGTH]),
            filename: b"hi.txt".to_vec(),
        })));

        let recv_number = pack_file_number(TransferDirection::Receiving, 0);
        assert_eq!(*offers.borrow(), vec![(recv_number, 1, 5, b"hi.txt".to_vec())]);
        assert_eq!(m.friendlist[0].file_receiving[0].status, FileStatus::NotAccepted);
        assert_eq!(m.file_get_id(friend, recv_number), Ok(FileId([9; FILE_ID_LENGTH])));

        state.borrow_mut().packets.clear();
        m.file_control(friend, recv_number, ControlType::Accept).unwrap();
        assert_eq!(m.friendlist[0].file_receiving[0].status, FileStatus::Transferring);
        {
            let state = state.borrow();
            assert_eq!(state.packets.len(), 1);
            // our role on the wire is the receiving side
            assert_eq!(state.packets[0].1, vec![PACKET_ID_FILE_CONTROL, 1, 0, 0]);
        }

        // a short chunk carries the whole file and terminates the stream
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileData(FileData {
            file_number: 0,
            data: b"abcde".to_vec(),
        })));
        assert_eq!(*datas.borrow(), vec![
            (recv_number, 0, b"abcde".to_vec()),
            (recv_number, 5, Vec::new()),
        ]);
        assert_eq!(m.friendlist[0].file_receiving[0].status, FileStatus::NoTransfer);
    }

    #[test]
    fn file_seek_before_accepting() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let size = 2 * 1024 * 1024;
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileSendRequest(FileSendRequest {
            file_number: 0,
            file_type: 0,
            file_size: size,
            file_id: FileId::new(),
            filename: b"resume.bin".to_vec(),
        })));

        let recv_number = pack_file_number(TransferDirection::Receiving, 0);

        assert_eq!(m.file_seek(friend, 0, 1), Err(FileSeekError::NotSending));
        assert_eq!(m.file_seek(friend, recv_number, size + 1), Err(FileSeekError::BadPosition));

        m.file_seek(friend, recv_number, 1024 * 1024).unwrap();
        assert_eq!(m.friendlist[0].file_receiving[0].transferred, 1024 * 1024);
        assert_eq!(m.friendlist[0].file_receiving[0].requested, 1024 * 1024);

        m.file_control(friend, recv_number, ControlType::Accept).unwrap();
        assert_eq!(m.file_seek(friend, recv_number, 0), Err(FileSeekError::WrongState));
    }

    #[test]
    fn unknown_file_control_gets_reciprocal_kill() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        state.borrow_mut().packets.clear();

        // the peer talks about its sending slot 3, which we know nothing
        // about
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Sending,
            file_number: 3,
            control: ControlType::Accept,
        })));

        let state = state.borrow();
        assert_eq!(state.packets.len(), 1);
        assert_eq!(state.packets[0].1, vec![PACKET_ID_FILE_CONTROL, 1, 3, 2]);
    }

    #[test]
    fn zero_size_file_send() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        m.tick();

        let requests = Rc::new(RefCell::new(Vec::new()));
        let requests_c = requests.clone();
        m.callbacks().file_req_chunk = Some(Box::new(move |_friend, file_number, position, length| {
            requests_c.borrow_mut().push((file_number, position, length));
        }));

        m.new_file_send(friend, 0, 0, FileId::new(), b"empty").unwrap();
        m.handle_packet(friend, 0, &packet_bytes(&Packet::FileControl(FileControl {
            direction: TransferDirection::Receiving,
            file_number: 0,
            control: ControlType::Accept,
        })));

        state.borrow_mut().packets.clear();
        let packet_num = state.borrow().next_packet_num;
        m.tick();

        // a single empty data packet is the whole stream
        {
            let state = state.borrow();
            assert_eq!(state.packets.len(), 1);
            assert_eq!(state.packets[0].1, vec![PACKET_ID_FILE_DATA, 0]);
        }
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::Finished);
        assert!(requests.borrow().is_empty());

        state.borrow_mut().acked.insert(packet_num);
        m.tick();
        assert_eq!(*requests.borrow(), vec![(0, 0, 0)]);
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NoTransfer);
        assert_eq!(m.friendlist[0].num_sending_files, 0);
    }

    #[test]
    fn disconnect_breaks_transfers_and_resyncs_profile() {
        let (mut m, state) = create_messenger();
        m.set_name(b"us").unwrap();
        m.set_status_message(b"here").unwrap();
        let friend = add_online_friend(&mut m, &state);
        m.tick();

        m.new_file_send(friend, 0, 1024, FileId::new(), b"f").unwrap();
        m.send_message(friend, MessageKind::Normal, b"x").unwrap();
        assert_eq!(m.friendlist[0].receipts.len(), 1);

        // the transport loses the only device
        m.handle_connection_status(friend, 0, false);
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
        assert_eq!(m.friendlist[0].file_sending[0].status, FileStatus::NoTransfer);
        assert_eq!(m.friendlist[0].num_sending_files, 0);
        assert!(m.friendlist[0].receipts.is_empty());
        assert_eq!(m.connection_status(friend), ConnectionKind::None);

        // on reconnect the whole profile goes out exactly once
        m.handle_connection_status(friend, 0, true);
        m.handle_packet(friend, 0, &[PACKET_ID_ONLINE]);
        state.borrow_mut().packets.clear();
        m.tick();
        {
            let state = state.borrow();
            let ids = state.packet_ids();
            assert_eq!(ids.iter().filter(|&&id| id == PACKET_ID_NICKNAME).count(), 1);
            assert_eq!(ids.iter().filter(|&&id| id == PACKET_ID_STATUSMESSAGE).count(), 1);
            assert_eq!(ids.iter().filter(|&&id| id == PACKET_ID_USERSTATUS).count(), 1);
            assert_eq!(ids.iter().filter(|&&id| id == PACKET_ID_TYPING).count(), 1);
        }

        let packets_after_resync = state.borrow().packets.len();
        m.tick();
        assert_eq!(state.borrow().packets.len(), packets_after_resync);
    }

    #[test]
    fn remove_friend_frees_slot() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        let pk2 = gen_keypair().0;
        let friend2 = m.add_friend_norequest(&pk2).unwrap();
        assert_eq!(friend2, 1);

        state.borrow_mut().packets.clear();
        m.remove_friend(friend).unwrap();
        assert!(!m.friend_exists(friend));
        // the connected peer is told that we are gone
        assert_eq!(state.borrow().packet_ids(), vec![PACKET_ID_OFFLINE]);
        assert!(state.borrow().conns[0].killed);

        // the freed slot is reused by the next add
        let pk3 = gen_keypair().0;
        assert_eq!(m.add_friend_norequest(&pk3), Ok(0));

        assert_eq!(m.remove_friend(5), Err(RemoveFriendError::Invalid));

        // removing the tail shrinks the roster
        m.remove_friend(friend2).unwrap();
        assert_eq!(m.friendlist.len(), 1);
        assert_eq!(m.copy_friendlist(), vec![0]);
    }

    #[test]
    fn add_device_requires_confirmed_friend() {
        let (mut m, _state) = create_messenger();
        let address = address_bytes(&gen_keypair().0, NoSpam::from(1));
        let friend = m.add_friend(&address, b"yo").unwrap();
        let dev_address = address_bytes(&gen_keypair().0, NoSpam::from(2));
        assert_eq!(m.add_device(&dev_address, friend), Err(AddDeviceError::Invalid));
    }

    #[test]
    fn message_fan_out_to_all_online_devices() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        let conn0 = m.friendlist[0].devices[0].conn_id;

        let dev_pk = gen_keypair().0;
        let dev_address = address_bytes(&dev_pk, NoSpam::from(5));
        let device = m.add_device(&dev_address, friend).unwrap();
        assert_eq!(device, 1);
        assert_eq!(m.friend_by_pk(&dev_pk), Some((friend, 1)));
        assert_eq!(m.add_device(&dev_address, friend), Err(AddDeviceError::AlreadySent));

        let conn1 = m.friendlist[0].devices[1].conn_id;
        state.borrow_mut().conns[conn1].connected = true;
        m.handle_connection_status(friend, 1, true);
        m.handle_packet(friend, 1, &[PACKET_ID_ONLINE]);

        state.borrow_mut().packets.clear();
        let first_num = state.borrow().next_packet_num;
        m.send_message(friend, MessageKind::Normal, b"both").unwrap();
        {
            let state = state.borrow();
            assert_eq!(state.packets.len(), 2);
            assert_eq!(state.packets[0].0, conn0);
            assert_eq!(state.packets[1].0, conn1);
        }
        // the single receipt tracks the primary device's packet
        assert_eq!(m.friendlist[0].receipts.front().unwrap().packet_num, first_num);
        assert_eq!(m.friendlist[0].receipts.len(), 1);
    }

    #[test]
    fn offline_packet_demotes_device() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        let dev_pk = gen_keypair().0;
        let dev_address = address_bytes(&dev_pk, NoSpam::from(6));
        m.add_device(&dev_address, friend).unwrap();
        let conn1 = m.friendlist[0].devices[1].conn_id;
        state.borrow_mut().conns[conn1].connected = true;
        m.handle_connection_status(friend, 1, true);

        // losing one device keeps the friend online
        m.handle_packet(friend, 1, &[PACKET_ID_OFFLINE]);
        assert_eq!(m.friendlist[0].devices[1].status, DeviceStatus::Confirmed);
        assert_eq!(m.friendlist[0].status, FriendStatus::Online);

        // losing the last one demotes the friend
        m.handle_packet(friend, 0, &[PACKET_ID_OFFLINE]);
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
    }

    #[test]
    fn secondary_device_handshake_does_not_touch_primary() {
        let (mut m, state) = create_messenger();
        let pk = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk).unwrap();

        let dev_pk = gen_keypair().0;
        let dev_address = address_bytes(&dev_pk, NoSpam::from(11));
        m.add_device(&dev_address, friend).unwrap();

        // the secondary device is the first (and only) one to connect
        let conn1 = m.friendlist[0].devices[1].conn_id;
        state.borrow_mut().conns[conn1].connected = true;
        m.handle_connection_status(friend, 1, true);
        m.handle_packet(friend, 1, &[PACKET_ID_ONLINE]);

        assert_eq!(m.friendlist[0].status, FriendStatus::Online);
        assert_eq!(m.friendlist[0].devices[1].status, DeviceStatus::Online);
        // the primary never connected and must not be reported online
        assert_eq!(m.friendlist[0].devices[0].status, DeviceStatus::Confirmed);

        // when the secondary drops, no device is left online and the
        // friend is demoted
        m.handle_connection_status(friend, 1, false);
        assert_eq!(m.friendlist[0].devices[1].status, DeviceStatus::Confirmed);
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
    }

    #[test]
    fn custom_lossy_and_lossless_packets() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);

        assert_eq!(m.send_lossy_packet(5, &[200, 1]), Err(CustomPacketError::InvalidFriend));
        assert_eq!(m.send_lossy_packet(friend, &[]), Err(CustomPacketError::BadLength));
        assert_eq!(m.send_lossy_packet(friend, &[42, 1]), Err(CustomPacketError::BadId));
        assert_eq!(m.send_lossless_packet(friend, &[42, 1]), Err(CustomPacketError::BadId));

        m.send_lossy_packet(friend, &[200, 1, 2]).unwrap();
        assert_eq!(state.borrow().lossy_packets.len(), 1);

        state.borrow_mut().packets.clear();
        m.send_lossless_packet(friend, &[170, 1, 2]).unwrap();
        assert_eq!(state.borrow().packet_ids(), vec![170]);

        // reserved sub-range dispatches to the per-byte handler
        let rtp = Rc::new(RefCell::new(Vec::new()));
        let rtp_c = rtp.clone();
        m.register_rtp_handler(friend, 200, Some(Box::new(move |_friend, data: &[u8]| {
            rtp_c.borrow_mut().push(data.to_vec());
        }))).unwrap();
        let lossy = Rc::new(RefCell::new(Vec::new()));
        let lossy_c = lossy.clone();
        m.callbacks().lossy_packet = Some(Box::new(move |_friend, data: &[u8]| {
            lossy_c.borrow_mut().push(data.to_vec());
        }));
        let lossless = Rc::new(RefCell::new(Vec::new()));
        let lossless_c = lossless.clone();
        m.callbacks().lossless_packet = Some(Box::new(move |_friend, data: &[u8]| {
            lossless_c.borrow_mut().push(data.to_vec());
        }));

        m.handle_lossy_packet(friend, 0, &[200, 9]);
        assert_eq!(*rtp.borrow(), vec![vec![200, 9]]);
        assert!(lossy.borrow().is_empty());

        m.handle_lossy_packet(friend, 0, &[210, 9]);
        assert_eq!(*lossy.borrow(), vec![vec![210, 9]]);

        m.handle_packet(friend, 0, &[170, 9]);
        assert_eq!(*lossless.borrow(), vec![vec![170, 9]]);

        assert_eq!(m.register_rtp_handler(friend, 42, None), Err(CustomPacketError::BadId));
    }

    #[test]
    fn connection_kind_reporting_debounces() {
        let (mut m, state) = create_messenger();

        let kinds = Rc::new(RefCell::new(Vec::new()));
        let kinds_c = kinds.clone();
        m.callbacks().connection_status = Some(Box::new(move |_friend, kind| {
            kinds_c.borrow_mut().push(kind);
        }));

        let friend = add_online_friend(&mut m, &state);
        let conn = m.friendlist[0].devices[0].conn_id;

        // no connection info yet: unknown is reported as TCP
        assert_eq!(*kinds.borrow(), vec![ConnectionKind::Tcp]);

        state.borrow_mut().conn_statuses.insert(conn, (true, 0));
        m.tick();
        assert_eq!(*kinds.borrow(), vec![ConnectionKind::Tcp, ConnectionKind::Udp]);

        // a momentarily unknown path does not flap away from UDP
        state.borrow_mut().conn_statuses.insert(conn, (false, 0));
        m.tick();
        assert_eq!(*kinds.borrow(), vec![ConnectionKind::Tcp, ConnectionKind::Udp]);

        state.borrow_mut().conn_statuses.insert(conn, (false, 2));
        m.tick();
        assert_eq!(*kinds.borrow(),
                   vec![ConnectionKind::Tcp, ConnectionKind::Udp, ConnectionKind::Tcp]);
        assert_eq!(m.connection_status(friend), ConnectionKind::Tcp);
    }

    #[test]
    fn core_connection_change_is_debounced() {
        let (mut m, state) = create_messenger();

        let changes = Rc::new(RefCell::new(Vec::new()));
        let changes_c = changes.clone();
        m.callbacks().core_connection_change = Some(Box::new(move |kind| {
            changes_c.borrow_mut().push(kind);
        }));

        m.tick();
        assert!(changes.borrow().is_empty());

        state.borrow_mut().onion_status = ConnectionKind::Udp;
        m.tick();
        m.tick();
        assert_eq!(*changes.borrow(), vec![ConnectionKind::Udp]);
    }

    #[test]
    fn set_name_same_value_keeps_sent_flags() {
        let (mut m, state) = create_messenger();
        let _friend = add_online_friend(&mut m, &state);
        m.set_name(b"self").unwrap();
        m.tick();
        assert!(m.friendlist[0].name_sent);

        m.set_name(b"self").unwrap();
        assert!(m.friendlist[0].name_sent);
        assert_eq!(m.name(), b"self");

        m.set_name(b"other").unwrap();
        assert!(!m.friendlist[0].name_sent);

        assert_eq!(m.set_name(&[0; MAX_NAME_LENGTH + 1]), Err(SetInfoError::TooLong));
    }

    #[test]
    fn set_typing_marks_for_resync() {
        let (mut m, state) = create_messenger();
        let friend = add_online_friend(&mut m, &state);
        m.tick();
        assert!(m.friendlist[0].typing_sent);

        m.set_typing(friend, true).unwrap();
        assert!(!m.friendlist[0].typing_sent);
        m.tick();
        assert!(m.friendlist[0].typing_sent);

        // no change, no resync
        m.set_typing(friend, true).unwrap();
        assert!(m.friendlist[0].typing_sent);

        assert_eq!(m.set_typing(7, true), Err(RemoveFriendError::Invalid));
    }

    #[test]
    fn friend_request_filter_drops_known_keys() {
        let (mut m, _state) = create_messenger();

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_c = received.clone();
        m.callbacks().friend_request = Some(Box::new(move |pk, msg: &[u8]| {
            received_c.borrow_mut().push((*pk, msg.to_vec()));
        }));

        let pk = gen_keypair().0;
        m.handle_friend_request(&pk, b"hey");
        assert_eq!(received.borrow().len(), 1);

        m.add_friend_norequest(&pk).unwrap();
        m.handle_friend_request(&pk, b"hey again");
        assert_eq!(received.borrow().len(), 1);
    }

    #[test]
    fn run_interval_is_capped() {
        let (m, _state) = create_messenger();
        // the mock transport asks for 200 ms, the messenger needs 50
        assert_eq!(m.run_interval(), MIN_RUN_INTERVAL);
    }

    #[test]
    fn save_load_round_trip() {
        let (mut m, state) = create_messenger();
        m.set_name(b"alice").unwrap();
        m.set_status_message(b"status here").unwrap();
        m.set_user_status(UserStatus::Away);

        // a confirmed friend with a second device and a cached profile
        let pk1 = gen_keypair().0;
        let friend = m.add_friend_norequest(&pk1).unwrap();
        let dev_pk = gen_keypair().0;
        let dev_address = address_bytes(&dev_pk, NoSpam::from(9));
        m.add_device(&dev_address, friend).unwrap();
        m.friendlist[friend as usize].name = b"bob".to_vec();
        m.friendlist[friend as usize].status_message = b"busy bee".to_vec();
        m.friendlist[friend as usize].user_status = UserStatus::Busy;
        m.friendlist[friend as usize].last_seen_time = 123_456;

        // a friend whose request is still pending
        let pk2 = gen_keypair().0;
        m.add_friend(&address_bytes(&pk2, NoSpam::from(0xabcd_ef01)), b"let me in").unwrap();

        // one connected relay to remember
        state.borrow_mut().connected_relays.push(TcpUdpPackedNode {
            pk: gen_keypair().0,
            ip_port: IpPort {
                protocol: ProtocolType::TCP,
                ip_addr: "1.2.3.4".parse().unwrap(),
                port: 33445,
            },
        });

        let saved = m.save();

        let (mut loaded, state2) = create_messenger();
        loaded.load(&saved).unwrap();

        assert_eq!(loaded.count_friendlist(), 2);
        assert_eq!(loaded.name(), b"alice");
        assert_eq!(loaded.status_message(), b"status here");
        assert_eq!(loaded.user_status(), UserStatus::Away);

        assert_eq!(loaded.friend_by_pk(&pk1), Some((0, 0)));
        assert_eq!(loaded.friend_by_pk(&dev_pk), Some((0, 1)));
        assert_eq!(loaded.friendlist[0].status, FriendStatus::Confirmed);
        assert_eq!(loaded.friend_name(0), Some(&b"bob"[..]));
        assert_eq!(loaded.friend_status_message(0), Some(&b"busy bee"[..]));
        assert_eq!(loaded.friend_user_status(0), Some(UserStatus::Busy));
        assert_eq!(loaded.last_online(0), Some(123_456));

        assert_eq!(loaded.friend_by_pk(&pk2), Some((1, 0)));
        assert_eq!(loaded.friendlist[1].status, FriendStatus::Added);
        assert_eq!(loaded.friendlist[1].info, b"let me in".to_vec());
        assert_eq!(loaded.friendlist[1].request_nospam, NoSpam::from(0xabcd_ef01));

        // cached relays reach the transport on the first tick
        assert!(state2.borrow().added_relays.is_empty());
        loaded.tick();
        assert_eq!(state2.borrow().added_relays.len(), 1);
        loaded.tick();
        assert_eq!(state2.borrow().added_relays.len(), 1);

        // saving the loaded state round-trips to an equivalent roster
        let saved2 = loaded.save();
        let (mut loaded2, _state3) = create_messenger();
        loaded2.load(&saved2).unwrap();
        assert_eq!(loaded2.count_friendlist(), 2);
        assert_eq!(loaded2.friend_by_pk(&pk1), Some((0, 0)));
        assert_eq!(loaded2.friend_by_pk(&dev_pk), Some((0, 1)));
        assert_eq!(loaded2.friendlist[1].request_nospam, NoSpam::from(0xabcd_ef01));
    }

    #[test]
    fn load_legacy_oldfriends_section() {
        let (mut m, _state) = create_messenger();
        let confirmed_pk = gen_keypair().0;
        let pending_pk = gen_keypair().0;

        let state_data = State {
            sections: vec![
                Section::OldFriends(OldFriends(vec![
                    OldFriendState {
                        status: FriendStatus::Online,
                        pk: confirmed_pk,
                        info: Vec::new(),
                        name: b"old pal".to_vec(),
                        status_message: b"vintage".to_vec(),
                        user_status: UserStatus::None,
                        nospam: NoSpam([0; 4]),
                        last_seen: 777,
                    },
                    OldFriendState {
                        status: FriendStatus::FrSent,
                        pk: pending_pk,
                        info: b"hello again".to_vec(),
                        name: Vec::new(),
                        status_message: Vec::new(),
                        user_status: UserStatus::None,
                        nospam: NoSpam([5; 4]),
                        last_seen: 0,
                    },
                ])),
                Section::Eof(Eof),
            ],
        };
        let mut buf = vec![0; state_data.buf_len()];
        let (_, size) = state_data.to_bytes((&mut buf, 0)).unwrap();

        m.load(&buf[..size]).unwrap();
        assert_eq!(m.count_friendlist(), 2);
        assert_eq!(m.friendlist[0].status, FriendStatus::Confirmed);
        assert_eq!(m.friend_name(0), Some(&b"old pal"[..]));
        assert_eq!(m.friend_status_message(0), Some(&b"vintage"[..]));
        assert_eq!(m.last_online(0), Some(777));
        assert_eq!(m.friendlist[1].status, FriendStatus::Added);
        assert_eq!(m.friendlist[1].info, b"hello again".to_vec());
        assert_eq!(m.friendlist[1].request_nospam, NoSpam([5; 4]));
        assert_eq!(m.friend_by_pk(&pending_pk), Some((1, 0)));
    }

    #[test]
    fn load_skips_friend_without_devices() {
        let (mut m, _state) = create_messenger();
        let pk = gen_keypair().0;

        let state_data = State {
            sections: vec![
                Section::Friends(Friends(vec![
                    SavedFriend {
                        status: FriendStatus::Confirmed,
                        info: Vec::new(),
                        name: b"ghost".to_vec(),
                        status_message: Vec::new(),
                        user_status: UserStatus::None,
                        nospam: NoSpam([0; 4]),
                        last_seen_time: 0,
                        devices: Vec::new(),
                    },
                    SavedFriend {
                        status: FriendStatus::Confirmed,
                        info: Vec::new(),
                        name: b"real".to_vec(),
                        status_message: Vec::new(),
                        user_status: UserStatus::None,
                        nospam: NoSpam([0; 4]),
                        last_seen_time: 0,
                        devices: vec![SavedDevice {
                            status: DeviceStatus::Confirmed,
                            real_pk: pk,
                        }],
                    },
                ])),
                Section::Eof(Eof),
            ],
        };
        let mut buf = vec![0; state_data.buf_len()];
        let (_, size) = state_data.to_bytes((&mut buf, 0)).unwrap();

        m.load(&buf[..size]).unwrap();
        assert_eq!(m.count_friendlist(), 1);
        assert_eq!(m.friend_name(0), Some(&b"real"[..]));
    }

    #[test]
    fn load_rejects_garbage() {
        let (mut m, _state) = create_messenger();
        assert!(m.load(b"definitely not a state").is_err());
        assert_eq!(m.count_friendlist(), 0);
    }
}
