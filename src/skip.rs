use std::io::{self, Read, Seek};

/// Strategy used by a [`Source`](crate::Source) to skip a large run of bytes.
pub trait Skip<R> {
    /// Skip the given number of bytes. If seek is not implemented by `reader`,
    /// `false` will be returned.
    ///
    /// Therefore, the caller can implement the skip function by himself,
    /// thereby reusing the caller's own buffer.
    fn skip_by_seek(reader: &mut R, skip: u64) -> io::Result<bool>;

    fn debug() -> &'static str;
}

/// Marks a reader that implements `Seek`: large discards become
/// `seek(SeekFrom::Current(n))`.
pub struct Seekable;

/// Marks a reader that can only be read sequentially.
pub struct Unseekable;

impl<R: Read> Skip<R> for Unseekable {
    #[inline]
    fn skip_by_seek(_: &mut R, _: u64) -> io::Result<bool> {
        Ok(false)
    }

    fn debug() -> &'static str {
        "unseekable"
    }
}

impl<R: Seek> Skip<R> for Seekable {
    #[inline]
    fn skip_by_seek(reader: &mut R, skip: u64) -> io::Result<bool> {
        let skip: i64 = skip
            .try_into()
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        reader.seek_relative(skip)?;
        Ok(true)
    }

    fn debug() -> &'static str {
        "seekable"
    }
}

#[cfg(test)]
mod tests {
    use io::{repeat, Cursor};

    use super::*;

    fn parse<S: Skip<R>, R: Read>(reader: &mut R) -> io::Result<bool> {
        S::skip_by_seek(reader, 2)
    }

    #[test]
    fn skip() {
        let mut buf = Cursor::new([0u8, 3, 5]);
        assert!(!parse::<Unseekable, _>(&mut buf).unwrap());
        assert!(parse::<Seekable, _>(&mut buf).unwrap());
        assert_eq!(buf.position(), 2);

        let mut r = repeat(0);
        assert!(!parse::<Unseekable, _>(&mut r).unwrap());
    }
}
