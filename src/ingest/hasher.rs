//! Content fingerprints
//!
//! Streaming SHA-1 over a reader with base64 output, the form the server
//! reports for asset checksums.

use std::io::{self, Read};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::ingest::fsys::{FsResult, SourceFs};

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash everything `reader` yields
pub fn sha1_base64<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(BASE64.encode(hasher.finalize()))
}

pub fn sha1_bytes(data: &[u8]) -> String {
    BASE64.encode(Sha1::digest(data))
}

/// Hash one file of a source
pub fn hash_file(fs: &SourceFs, path: &str) -> FsResult<String> {
    let reader = fs.open(path)?;
    Ok(sha1_base64(reader)?)
}
