//! HTTP `Range` header handling for object reads.

use minnow_common::error::{MinnowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRange {
    /// `bytes=a-b`
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`
    Suffix(u64),
}

/// Inclusive byte range resolved against an object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

impl HttpRange {
    /// Parses a `Range` header. Units other than `bytes` and multi-range
    /// requests yield `None` and the whole object is served.
    pub fn parse(header: &str) -> Result<Option<Self>> {
        let Some(spec) = header.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        if spec.contains(',') {
            return Ok(None);
        }
        let invalid = || MinnowError::InvalidRange { size: 0 };
        let (start, end) = spec.trim().split_once('-').ok_or_else(invalid)?;
        let number = |value: &str| value.trim().parse::<u64>().map_err(|_| invalid());

        match (start.trim().is_empty(), end.trim().is_empty()) {
            (false, false) => Ok(Some(Self::FromTo(number(start)?, number(end)?))),
            (false, true) => Ok(Some(Self::From(number(start)?))),
            (true, false) => Ok(Some(Self::Suffix(number(end)?))),
            (true, true) => Err(invalid()),
        }
    }

    pub fn resolve(&self, size: u64) -> Result<ByteRange> {
        let unsatisfiable = || MinnowError::InvalidRange { size };
        if size == 0 {
            return Err(unsatisfiable());
        }
        let last = size - 1;
        match *self {
            Self::FromTo(start, end) => {
                if start > end || start > last {
                    return Err(unsatisfiable());
                }
                Ok(ByteRange {
                    start,
                    end: end.min(last),
                })
            }
            Self::From(start) => {
                if start > last {
                    return Err(unsatisfiable());
                }
                Ok(ByteRange { start, end: last })
            }
            Self::Suffix(0) => Err(unsatisfiable()),
            Self::Suffix(length) => Ok(ByteRange {
                start: size.saturating_sub(length),
                end: last,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice<'a>(data: &'a [u8], header: &str) -> Result<&'a [u8]> {
        let range = HttpRange::parse(header)?.expect("byte range");
        let resolved = range.resolve(data.len() as u64)?;
        Ok(&data[resolved.start as usize..=resolved.end as usize])
    }

    #[test]
    fn ranges_over_hello_world() {
        let data = b"Hello World";
        assert_eq!(slice(data, "bytes=6-7").unwrap(), b"Wo");
        assert_eq!(slice(data, "bytes=6-").unwrap(), b"World");
        assert_eq!(slice(data, "bytes=-7").unwrap(), b"o World");
        assert_eq!(slice(data, "bytes=0-100").unwrap(), b"Hello World");
        assert_eq!(slice(data, "bytes=-100").unwrap(), b"Hello World");
    }

    #[test]
    fn unsatisfiable_ranges() {
        let data = b"Hello World";
        for header in ["bytes=7-6", "bytes=11-", "bytes=20-30", "bytes=-0"] {
            assert!(
                matches!(slice(data, header), Err(MinnowError::InvalidRange { size: 11 })),
                "{header}"
            );
        }
        assert!(matches!(
            HttpRange::parse("bytes=-").unwrap_err(),
            MinnowError::InvalidRange { .. }
        ));
        assert!(HttpRange::parse("bytes=a-b").is_err());
        assert!(HttpRange::From(0).resolve(0).is_err());
    }

    #[test]
    fn ignored_ranges() {
        assert_eq!(HttpRange::parse("items=0-5").unwrap(), None);
        assert_eq!(HttpRange::parse("bytes=0-1,4-5").unwrap(), None);
    }

    #[test]
    fn content_range_header() {
        let range = HttpRange::FromTo(6, 7).resolve(11).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range.content_range(11), "bytes 6-7/11");
    }
}
