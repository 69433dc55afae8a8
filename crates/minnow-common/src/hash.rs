use md5::{Digest, Md5};

use crate::error::{MinnowError, Result};

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Strips the quotes clients put around ETags.
pub fn canonical_etag(etag: &str) -> &str {
    let etag = etag.trim();
    etag.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(etag)
}

/// ETag of a completed multipart upload: MD5 over the raw digests of every
/// part, suffixed with the part count.
pub fn multipart_etag<'a, I>(part_etags: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Md5::new();
    let mut count = 0_usize;
    for etag in part_etags {
        let raw = hex::decode(canonical_etag(etag))
            .map_err(|_| MinnowError::InvalidPart(format!("part etag is not hex: {etag}")))?;
        hasher.update(&raw);
        count += 1;
    }
    Ok(format!("{}-{count}", hex::encode(hasher.finalize())))
}
