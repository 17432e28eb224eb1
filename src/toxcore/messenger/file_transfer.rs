/*! File transfer slots and the file-number convention.

Each friend owns two fixed arrays of transfer slots, one per direction. On
the wire a transfer is a single byte (the slot index); the API packs the
direction into a 32-bit file number: numbers `>= 1 << 16` refer to
receiving slots.
*/

use nom::le_u8;

use toxcore::binary_io::*;
use toxcore::crypto_core::randombytes_into;
use toxcore::net_crypto::{CRYPTO_MIN_QUEUE_LENGTH, MAX_CRYPTO_DATA_SIZE};

/// Number of concurrent file transfers per friend and direction.
pub const MAX_CONCURRENT_FILE_PIPES: usize = 32;

/// Length of the file id identifying a transfer across resumes.
pub const FILE_ID_LENGTH: usize = 32;

/// Maximum length of a transferred file name in bytes.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Largest file chunk that fits a transport packet after the packet id and
/// the slot byte.
pub const MAX_FILE_DATA_SIZE: usize = MAX_CRYPTO_DATA_SIZE - 2;

/// Transport queue slots file transfers must leave free for messages.
pub const MIN_SLOTS_FREE: usize = CRYPTO_MIN_QUEUE_LENGTH / 4;

/** Unique id of a file transfer, chosen by the sender.

Survives pause/resume across reconnects, unlike the slot index.
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileId(pub [u8; FILE_ID_LENGTH]);

impl FileId {
    /// Generate a random `FileId`.
    pub fn new() -> FileId {
        let mut id = [0; FILE_ID_LENGTH];
        randombytes_into(&mut id);
        FileId(id)
    }
}

impl FromBytes for FileId {
    named!(from_bytes<FileId>, map!(count_fixed!(u8, le_u8, FILE_ID_LENGTH), FileId));
}

impl ToBytes for FileId {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_slice!(self.0)
        )
    }
}

/// Status of a transfer slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileStatus {
    /// The slot is free.
    NoTransfer,
    /// Announced but not yet accepted by the receiver.
    NotAccepted,
    /// Data is flowing.
    Transferring,
    /// All data sent; waiting for the last packet to be acknowledged.
    Finished,
}

impl Default for FileStatus {
    fn default() -> Self {
        FileStatus::NoTransfer
    }
}

/// Who paused the transfer. Both sides may hold a pause at once; data
/// flows only while neither does.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pause {
    /// We paused the transfer.
    pub us: bool,
    /// The other side paused the transfer.
    pub other: bool,
}

impl Pause {
    /// Whether the transfer is not paused at all.
    pub fn is_none(self) -> bool {
        !self.us && !self.other
    }
}

/** State of one transfer slot.

Invariant while active: `transferred <= requested <= size` (`size` of
`u64::max_value()` means streaming / unknown).
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct FileTransfer {
    /// Status of the slot.
    pub status: FileStatus,
    /// Total size of the file in bytes.
    pub size: u64,
    /// Bytes sent (or received) so far.
    pub transferred: u64,
    /// Bytes covered by issued chunk requests (sending only).
    pub requested: u64,
    /// Chunk requests currently in flight.
    pub slots_allocated: u32,
    /// Pause flags of both sides.
    pub paused: Pause,
    /// Transport number of the terminating data packet (status
    /// `Finished`).
    pub last_packet_number: u32,
    /// Id of the transfer.
    pub id: FileId,
}

/// Which side of a transfer a file number or control packet refers to,
/// seen from the peer that allocated / talks about it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferDirection {
    /// An outgoing transfer.
    Sending = 0,
    /// An incoming transfer.
    Receiving = 1,
}

impl FromBytes for TransferDirection {
    named!(from_bytes<TransferDirection>, switch!(le_u8,
        0 => value!(TransferDirection::Sending) |
        1 => value!(TransferDirection::Receiving)
    ));
}

impl ToBytes for TransferDirection {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(*self as u8)
        )
    }
}

/** Pack a direction and a slot index into the 32-bit API file number.

```
use self::tox_messenger::toxcore::messenger::file_transfer::*;

assert_eq!(pack_file_number(TransferDirection::Sending, 5), 5);
assert_eq!(pack_file_number(TransferDirection::Receiving, 5), 6 << 16);
```
*/
pub fn pack_file_number(direction: TransferDirection, slot: u8) -> u32 {
    match direction {
        TransferDirection::Sending => u32::from(slot),
        TransferDirection::Receiving => (u32::from(slot) + 1) << 16,
    }
}

/** Split the 32-bit API file number back into direction and slot index.

Returns `None` when the slot index is out of range.

```
use self::tox_messenger::toxcore::messenger::file_transfer::*;

assert_eq!(unpack_file_number(5), Some((TransferDirection::Sending, 5)));
assert_eq!(unpack_file_number(6 << 16), Some((TransferDirection::Receiving, 5)));
assert_eq!(unpack_file_number(1 << 13), None);
```
*/
pub fn unpack_file_number(file_number: u32) -> Option<(TransferDirection, u8)> {
    if file_number >= 1 << 16 {
        let slot = (file_number >> 16) - 1;
        if (slot as usize) < MAX_CONCURRENT_FILE_PIPES {
            Some((TransferDirection::Receiving, slot as u8))
        } else {
            None
        }
    } else if (file_number as usize) < MAX_CONCURRENT_FILE_PIPES {
        Some((TransferDirection::Sending, file_number as u8))
    } else {
        None
    }
}
