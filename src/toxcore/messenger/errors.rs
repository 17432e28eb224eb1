/*! Errors of the messenger operations.

One enum per operation family. Errors are returned to the caller and never
unwind the tick loop; an error on one friend never affects another.
*/

/// Error that can happen when calling `add_friend` or
/// `add_friend_norequest`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum AddFriendError {
    /// The greeting message is longer than
    /// [`MAX_FRIEND_REQUEST_DATA_SIZE`]
    /// (../friend/constant.MAX_FRIEND_REQUEST_DATA_SIZE.html).
    #[fail(display = "Friend request message is too long")]
    TooLong,
    /// The greeting message is empty.
    #[fail(display = "Friend request message is missing")]
    NoMessage,
    /// The address belongs to ourselves.
    #[fail(display = "Cannot add own key as a friend")]
    OwnKey,
    /// The checksum of the address is wrong or the key is invalid.
    #[fail(display = "Bad checksum in the address")]
    BadChecksum,
    /// A friend request to this key was already sent, or the key is
    /// already a confirmed friend.
    #[fail(display = "Friend request already sent or already a friend")]
    AlreadySent,
    /// The friend existed with a different nospam; the stored nospam has
    /// been updated to the new one. A status, not a failure.
    #[fail(display = "Nospam of the pending friend was updated")]
    SetNewNospam,
    /// Growing the friend list or allocating the connection failed.
    #[fail(display = "Failed to allocate room for the friend")]
    NoMem,
}

/// Error that can happen when calling `add_device`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum AddDeviceError {
    /// The friend number is unknown, or the friend is not yet confirmed.
    #[fail(display = "No confirmed friend with this number")]
    Invalid,
    /// The checksum of the address is wrong or the key is invalid.
    #[fail(display = "Bad checksum in the address")]
    BadChecksum,
    /// The address belongs to ourselves.
    #[fail(display = "Cannot add own key as a device")]
    OwnKey,
    /// The key is already present in the roster.
    #[fail(display = "Key already belongs to a friend")]
    AlreadySent,
    /// The key belonged to a pending friend with a different nospam; the
    /// stored nospam has been updated. A status, not a failure.
    #[fail(display = "Nospam of the pending friend was updated")]
    SetNewNospam,
    /// Allocating the device slot or its connection failed.
    #[fail(display = "Failed to allocate room for the device")]
    NoMem,
}

/// Error that can happen when calling `remove_friend` or another operation
/// taking a bare friend number.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum RemoveFriendError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    Invalid,
}

/// Error that can happen when calling `send_message`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum SendMessageError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The message does not fit a transport packet.
    #[fail(display = "Message is too long")]
    TooLong,
    /// The friend is not online.
    #[fail(display = "Friend is not connected")]
    FriendNotConnected,
    /// The transport send queue of every online device is full.
    #[fail(display = "Transport queue is full")]
    QueueFull,
}

/// Error that can happen when calling `set_name`, `set_status_message`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum SetInfoError {
    /// The value exceeds its maximum length.
    #[fail(display = "Value is too long")]
    TooLong,
}

/// Error that can happen when calling `new_file_send`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FileSendError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The filename is longer than [`MAX_FILENAME_LENGTH`]
    /// (../file_transfer/constant.MAX_FILENAME_LENGTH.html).
    #[fail(display = "Filename is too long")]
    NameTooLong,
    /// All sending slots towards this friend are occupied.
    #[fail(display = "Too many concurrent file transfers")]
    TooManyFiles,
    /// The request packet could not be sent (friend offline or queue
    /// full).
    #[fail(display = "Failed to send the file request")]
    SendFailed,
}

/// Error that can happen when calling `file_control`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FileControlError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The friend is not online.
    #[fail(display = "Friend is not connected")]
    FriendNotConnected,
    /// The file number does not refer to an active transfer.
    #[fail(display = "No file transfer with this number")]
    InvalidFile,
    /// The control cannot be issued through this call (`Seek` goes
    /// through `file_seek`).
    #[fail(display = "Control not valid for this call")]
    BadControl,
    /// Pause requested, but the transfer is already paused by us or not
    /// transferring.
    #[fail(display = "Transfer is already paused")]
    AlreadyPaused,
    /// Resume requested, but the transfer is paused by the other side
    /// only.
    #[fail(display = "Transfer was not paused by us")]
    NotPausedByUs,
    /// Resume requested, but the transfer is not paused.
    #[fail(display = "Transfer is not paused")]
    NotPaused,
    /// The control packet could not be sent.
    #[fail(display = "Failed to send the control packet")]
    SendFailed,
}

/// Error that can happen when calling `file_seek`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FileSeekError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The friend is not online.
    #[fail(display = "Friend is not connected")]
    FriendNotConnected,
    /// The file number does not refer to an active transfer.
    #[fail(display = "No file transfer with this number")]
    InvalidFile,
    /// Only incoming transfers can be seeked.
    #[fail(display = "Transfer is not an incoming one")]
    NotSending,
    /// The transfer was already accepted; seeking is only possible
    /// before.
    #[fail(display = "Transfer is in the wrong state for seeking")]
    WrongState,
    /// The position lies at or beyond the end of the file.
    #[fail(display = "Seek position is past the end of the file")]
    BadPosition,
    /// The control packet could not be sent.
    #[fail(display = "Failed to send the seek packet")]
    SendFailed,
}

/// Error that can happen when calling `file_data`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FileDataError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The friend is not online.
    #[fail(display = "Friend is not connected")]
    FriendNotConnected,
    /// The file number does not refer to an active sending transfer.
    #[fail(display = "No file transfer with this number")]
    InvalidFile,
    /// The transfer is not in the transferring state.
    #[fail(display = "Transfer is not transferring")]
    NotTransferring,
    /// The chunk length does not match what the transfer expects.
    #[fail(display = "Bad chunk size")]
    BadSize,
    /// The transport send queue is full.
    #[fail(display = "Transport queue is full")]
    QueueFull,
    /// The position does not continue the stream or was never requested.
    #[fail(display = "Wrong chunk position")]
    WrongPosition,
}

/// Error that can happen when calling `file_get_id`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FileGetError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The file number does not refer to an active transfer.
    #[fail(display = "No file transfer with this number")]
    InvalidFile,
}

/// Error that can happen when sending a custom lossy or lossless packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum CustomPacketError {
    /// The friend number does not refer to an occupied roster slot.
    #[fail(display = "No friend with this number")]
    InvalidFriend,
    /// The packet is empty or longer than the transport allows.
    #[fail(display = "Bad custom packet length")]
    BadLength,
    /// The first byte is outside the range of this packet family.
    #[fail(display = "Custom packet id out of range")]
    BadId,
    /// The friend is not online.
    #[fail(display = "Friend is not connected")]
    NotConnected,
    /// The transport refused the packet.
    #[fail(display = "Failed to send custom packet")]
    SendFailed,
}
