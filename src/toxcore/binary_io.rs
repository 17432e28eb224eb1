//! Functions and traits for binary IO.

pub use cookie_factory::GenError;
pub use nom::IResult;

/// The trait provides method to deserialize struct from raw bytes using
/// `nom`.
pub trait FromBytes: Sized {
    /// Deserialize struct using `nom` from raw bytes.
    fn from_bytes(i: &[u8]) -> IResult<&[u8], Self>;
}

/// The trait provides method to serialize struct into raw bytes using
/// `cookie_factory`.
pub trait ToBytes: Sized {
    /// Serialize struct into raw bytes using `cookie_factory`.
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError>;
}

/// Round-trip a value through `ToBytes` and `FromBytes` and assert that
/// nothing changed along the way. Used by `encode_decode_test!`.
#[cfg(test)]
pub fn check_encode_decode<T>(value: &T)
    where T: FromBytes + ToBytes + PartialEq + ::std::fmt::Debug
{
    let mut buf = [0; 1024 * 50];
    let (_, size) = value.to_bytes((&mut buf, 0))
        .expect("ToBytes failed");
    match T::from_bytes(&buf[..size]) {
        IResult::Done(rest, ref decoded) => {
            assert!(rest.is_empty());
            assert_eq!(value, decoded);
        },
        e => panic!("FromBytes failed: {:?}", e),
    }
}

/** Test that encoding a value and decoding it back produces the same value.

E.g.

```text
encode_decode_test!(
    name_encode_decode,
    Name(vec![0, 1, 2, 3, 4])
);
```
*/
// FIXME: ↑ make it a real test, since doctest doesn't work
macro_rules! encode_decode_test (
    ($test:ident, $value:expr) => (
        #[test]
        fn $test() {
            ::toxcore::binary_io::check_encode_decode(&$value);
        }
    )
);
