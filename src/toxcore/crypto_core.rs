//! Functions for the core crypto.

pub use sodiumoxide::crypto::box_::{
    PublicKey,
    SecretKey,
    PUBLICKEYBYTES,
    SECRETKEYBYTES,
    gen_keypair,
};
pub use sodiumoxide::randombytes::randombytes_into;

use toxcore::binary_io::*;

/** Initialize sodium crypto. Runs automatically on first use, but should be
called explicitly by multithreaded hosts.

Returns `true` on success, `false` otherwise.
*/
pub fn crypto_init() -> bool {
    ::sodiumoxide::init()
}

/** Check if the key is a valid long-term `PublicKey`.

The last bit of a valid curve25519 key is always zero, so the last byte
never exceeds 127. Keys coming from the wire or from save files must be
checked before use.

E.g.

```
use self::tox_messenger::toxcore::crypto_core::*;

let (pk, _) = gen_keypair();
assert!(public_key_valid(&pk));

assert!(!public_key_valid(&PublicKey([0xff; PUBLICKEYBYTES])));
```
*/
pub fn public_key_valid(&PublicKey(ref pk): &PublicKey) -> bool {
    pk[PUBLICKEYBYTES - 1] <= 127
}

/** XOR 2 pairs of bytes together.

Used for calculating checksums of Tox IDs.
*/
pub fn xor_checksum(lhs: &[u8; 2], rhs: &[u8; 2]) -> [u8; 2] {
    [lhs[0] ^ rhs[0], lhs[1] ^ rhs[1]]
}

impl FromBytes for PublicKey {
    named!(from_bytes<PublicKey>, map_opt!(take!(PUBLICKEYBYTES), PublicKey::from_slice));
}

impl ToBytes for PublicKey {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_slice!(self.as_ref())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_valid_test() {
        assert!(public_key_valid(&PublicKey([0; PUBLICKEYBYTES])));
        assert!(public_key_valid(&PublicKey([127; PUBLICKEYBYTES])));
        assert!(!public_key_valid(&PublicKey([128; PUBLICKEYBYTES])));
    }

    #[test]
    fn xor_checksum_test() {
        assert_eq!([0, 0], xor_checksum(&[0, 0], &[0, 0]));
        assert_eq!([1, 2], xor_checksum(&[1, 2], &[0, 0]));
        assert_eq!([0, 0], xor_checksum(&[1, 2], &[1, 2]));
        assert_eq!([255, 255], xor_checksum(&[255, 0], &[0, 255]));
    }

    encode_decode_test!(
        public_key_encode_decode,
        gen_keypair().0
    );
}
