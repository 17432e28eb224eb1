/*
    Copyright © 2016 Zetok Zalbavar <zexavexxe@gmail.com>

    This file is part of Tox.

    Tox is libre software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    Tox is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with Tox.  If not, see <http://www.gnu.org/licenses/>.
*/

//! `Tox ID` and stuff related to it.

use std::fmt;
use std::ops::Deref;

use byteorder::{ByteOrder, LittleEndian};

use toxcore::binary_io::*;
use toxcore::crypto_core::*;


/** `NoSpam` used in [`ToxId`](./struct.ToxId.html).

    Number is used to make sure that there are no friend requests from
    peers that know our long term PK, but don't actually know our Tox ID.

    The preferred way of creating `NoSpam` is to generate a random one.

    Additionally, it should be possible to set a custom `NoSpam`.

    https://zetok.github.io/tox-spec/#messenger
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoSpam(pub [u8; NOSPAMBYTES]);

/// Number of bytes that [`NoSpam`](./struct.NoSpam.html) has.
pub const NOSPAMBYTES: usize = 4;

impl NoSpam {
    /// Create new `NoSpam` with random bytes.
    ///
    /// Two `new()` `NoSpam`s will always be different:
    ///
    /// ```
    /// use self::tox_messenger::toxcore::toxid::NoSpam;
    ///
    /// assert!(NoSpam::new() != NoSpam::new());
    /// ```
    pub fn new() -> Self {
        let mut nospam = [0; NOSPAMBYTES];
        randombytes_into(&mut nospam);
        NoSpam(nospam)
    }
}

impl Deref for NoSpam {
    type Target = [u8; NOSPAMBYTES];

    fn deref(&self) -> &[u8; NOSPAMBYTES] {
        let NoSpam(ref ns_bytes) = *self;
        ns_bytes
    }
}

/** `NoSpam` is kept as raw little-endian bytes on the wire, but hosts deal
in `u32`s.

```
use self::tox_messenger::toxcore::toxid::NoSpam;

assert_eq!(NoSpam::from(0x1122_3344), NoSpam([0x44, 0x33, 0x22, 0x11]));
assert_eq!(u32::from(NoSpam([0x44, 0x33, 0x22, 0x11])), 0x1122_3344);
```
*/
impl From<u32> for NoSpam {
    fn from(n: u32) -> Self {
        let mut bytes = [0; NOSPAMBYTES];
        LittleEndian::write_u32(&mut bytes, n);
        NoSpam(bytes)
    }
}

impl From<NoSpam> for u32 {
    fn from(NoSpam(ref bytes): NoSpam) -> u32 {
        LittleEndian::read_u32(bytes)
    }
}

/** The default formatting of `NoSpam`.

E.g.:

```
use self::tox_messenger::toxcore::toxid::NoSpam;

assert_eq!(format!("{:X}", NoSpam([0, 0, 0, 0])), "00000000");
assert_eq!(format!("{:X}", NoSpam([255, 255, 255, 255])), "FFFFFFFF");
```
*/
impl fmt::UpperHex for NoSpam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}{:02X}", self[0], self[1], self[2], self[3])
    }
}

/** `Display` should always be the same as `UpperHex`.

```
use self::tox_messenger::toxcore::toxid::NoSpam;

let nospam = NoSpam::new();
assert_eq!(format!("{}", nospam), format!("{:X}", nospam));
```
*/
impl fmt::Display for NoSpam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self)
    }
}

impl FromBytes for NoSpam {
    named!(from_bytes<NoSpam>, map!(take!(NOSPAMBYTES),
        |bytes: &[u8]| NoSpam([bytes[0], bytes[1], bytes[2], bytes[3]])
    ));
}

impl ToBytes for NoSpam {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_slice!(self.0)
        )
    }
}

/** Errors of parsing a [`ToxId`](./struct.ToxId.html) from raw bytes.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum AddressError {
    /// The 2-byte XOR fold of the address does not match the stored
    /// checksum.
    #[fail(display = "Address checksum does not match")]
    BadChecksum,
    /// The public key part of the address is not a valid curve point.
    #[fail(display = "Address public key is invalid")]
    BadKey,
}

/** `Tox ID` — the 38-byte friend address.

    Length | Contents
    ------ | --------
    32     | long term `PublicKey`
    4      | `NoSpam`
    2      | Checksum

    The checksum is the XOR fold of the first 36 bytes: byte `i` is XORed
    into `checksum[i % 2]`.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ToxId {
    /// Long-term `PublicKey`.
    pub pk: PublicKey,
    /// `NoSpam`.
    pub nospam: NoSpam,
    checksum: [u8; 2],
}

/// Number of bytes of serialized [`ToxId`](./struct.ToxId.html).
pub const TOXIDBYTES: usize = PUBLICKEYBYTES + NOSPAMBYTES + 2;

impl ToxId {
    /// Checksum of `PublicKey` and `NoSpam`.
    ///
    /// E.g.
    ///
    /// ```
    /// use self::tox_messenger::toxcore::crypto_core::{
    ///         gen_keypair,
    ///         PublicKey,
    ///         PUBLICKEYBYTES,
    /// };
    /// use self::tox_messenger::toxcore::toxid::{NoSpam, NOSPAMBYTES, ToxId};
    ///
    /// let (pk, _) = gen_keypair();
    /// let nospam = NoSpam::new();
    ///
    /// let _checksum = ToxId::checksum(&pk, &nospam);
    ///
    /// assert_eq!(ToxId::checksum(&PublicKey([0; PUBLICKEYBYTES]),
    ///            &NoSpam([0; NOSPAMBYTES])), [0; 2]);
    /// assert_eq!(ToxId::checksum(&PublicKey([0xff; PUBLICKEYBYTES]),
    ///            &NoSpam([0xff; NOSPAMBYTES])), [0; 2]);
    /// ```
    pub fn checksum(&PublicKey(ref pk): &PublicKey, nospam: &NoSpam) -> [u8; 2] {
        let mut bytes = Vec::with_capacity(TOXIDBYTES - 2);
        bytes.extend_from_slice(pk);
        bytes.extend_from_slice(nospam.as_ref());

        let mut checksum = [0; 2];

        for pair in bytes.chunks(2) {
            checksum = xor_checksum(&checksum, &[pair[0], pair[1]]);
        }
        checksum
    }

    /// Create new `ToxId` with a given `NoSpam`.
    ///
    /// E.g.
    ///
    /// ```
    /// use self::tox_messenger::toxcore::crypto_core::gen_keypair;
    /// use self::tox_messenger::toxcore::toxid::{NoSpam, ToxId};
    ///
    /// let (pk, _) = gen_keypair();
    /// let _toxid = ToxId::new(pk, NoSpam::new());
    /// ```
    pub fn new(pk: PublicKey, nospam: NoSpam) -> Self {
        ToxId {
            pk,
            nospam,
            checksum: Self::checksum(&pk, &nospam),
        }
    }

    /// Change `NoSpam`. If provided, change to provided value. If not
    /// provided (`None`), generate random `NoSpam`.
    ///
    /// After `NoSpam` change `PublicKey` is always the same, but `NoSpam`
    /// and `checksum` differ:
    ///
    /// ```
    /// use self::tox_messenger::toxcore::crypto_core::gen_keypair;
    /// use self::tox_messenger::toxcore::toxid::{NoSpam, ToxId};
    ///
    /// let (pk, _) = gen_keypair();
    /// let toxid = ToxId::new(pk, NoSpam::new());
    /// let mut toxid2 = toxid;
    /// toxid2.new_nospam(None);
    ///
    /// assert!(toxid != toxid2);
    /// assert_eq!(toxid.pk, toxid2.pk);
    ///
    /// let mut toxid3 = toxid;
    ///
    /// // with same `NoSpam` IDs are identical
    /// let nospam = NoSpam::new();
    /// toxid2.new_nospam(Some(nospam));
    /// toxid3.new_nospam(Some(nospam));
    /// assert_eq!(toxid2, toxid3);
    /// ```
    pub fn new_nospam(&mut self, nospam: Option<NoSpam>) {
        if let Some(nospam) = nospam {
            self.nospam = nospam;
        } else {
            self.nospam = NoSpam::new();
        }
        self.checksum = Self::checksum(&self.pk, &self.nospam);
    }

    /** Parse a `ToxId` from a 38-byte address, validating both the public
    key and the checksum.

    Fails with [`AddressError::BadKey`](./enum.AddressError.html) if the
    public key is not a valid curve point and with
    [`AddressError::BadChecksum`](./enum.AddressError.html) if the
    recomputed XOR fold differs from the stored one. An address of a wrong
    length is a `BadChecksum` too.

    E.g.

    ```
    use self::tox_messenger::toxcore::crypto_core::gen_keypair;
    use self::tox_messenger::toxcore::toxid::{AddressError, NoSpam, ToxId, TOXIDBYTES};
    use self::tox_messenger::toxcore::binary_io::ToBytes;

    let toxid = ToxId::new(gen_keypair().0, NoSpam::new());

    let mut bytes = [0; TOXIDBYTES];
    toxid.to_bytes((&mut bytes, 0)).unwrap();
    assert_eq!(Ok(toxid), ToxId::from_address(&bytes));

    bytes[35] = !bytes[35];
    assert_eq!(Err(AddressError::BadChecksum), ToxId::from_address(&bytes));
    ```
    */
    pub fn from_address(address: &[u8]) -> Result<ToxId, AddressError> {
        if address.len() != TOXIDBYTES {
            return Err(AddressError::BadChecksum)
        }

        let pk = PublicKey::from_slice(&address[..PUBLICKEYBYTES])
            .ok_or(AddressError::BadKey)?;

        if !public_key_valid(&pk) {
            return Err(AddressError::BadKey)
        }

        let nospam = NoSpam([
            address[PUBLICKEYBYTES],
            address[PUBLICKEYBYTES + 1],
            address[PUBLICKEYBYTES + 2],
            address[PUBLICKEYBYTES + 3],
        ]);

        let checksum = Self::checksum(&pk, &nospam);

        if checksum != [address[TOXIDBYTES - 2], address[TOXIDBYTES - 1]] {
            return Err(AddressError::BadChecksum)
        }

        Ok(ToxId { pk, nospam, checksum })
    }
}

impl FromBytes for ToxId {
    named!(from_bytes<ToxId>, do_parse!(
        pk: call!(PublicKey::from_bytes) >>
        nospam: call!(NoSpam::from_bytes) >>
        checksum: map!(take!(2), |b: &[u8]| [b[0], b[1]]) >>
        verify!(value!(checksum), |c| c == ToxId::checksum(&pk, &nospam)) >>
        (ToxId { pk, nospam, checksum })
    ));
}

impl ToBytes for ToxId {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_slice!(self.pk.as_ref()) >>
            gen_slice!(self.nospam.0) >>
            gen_slice!(self.checksum)
        )
    }
}
