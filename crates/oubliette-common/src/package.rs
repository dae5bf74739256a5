// package.rs — bundling a character's save files into one compressed file
//
// On exit the orchestrator can gather the player file, level files and
// auxiliary caches into a single ".pkg" so a save is one artifact on disk.
// Entries are deflate-compressed individually (raw deflate, no zlib header).
//
// Layout: [magic "OBPK"][count:u32] then per entry
//         [name:string][raw_len:u32][deflated blob].

use std::io::{Cursor, Read};
use std::path::Path;

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;

use crate::error::{SaveError, SaveResult};
use crate::lock::atomic_write;
use crate::marshal::{Reader, Writer};

const PACKAGE_MAGIC: &[u8; 4] = b"OBPK";

/// Cap on a single inflated entry, against corrupt or hostile packages.
const MAX_ENTRY_SIZE: u64 = 16 * 1024 * 1024;

pub const PACKAGE_EXT: &str = "pkg";

fn deflate(data: &[u8]) -> SaveResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(data, Compression::default());
    let mut out = Vec::with_capacity(data.len());
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

fn inflate(data: &[u8], raw_len: u32, bundle: &Path) -> SaveResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data).take(MAX_ENTRY_SIZE);
    let mut out = Vec::with_capacity(raw_len as usize);
    decoder.read_to_end(&mut out)?;
    if out.len() != raw_len as usize {
        return Err(SaveError::MalformedStream {
            path: bundle.to_path_buf(),
            detail: format!("entry inflated to {} bytes, expected {}", out.len(), raw_len),
        });
    }
    Ok(out)
}

/// Write `entries` (filename, contents) as a package at `bundle`.
pub fn write_package(bundle: &Path, entries: &[(String, Vec<u8>)]) -> SaveResult<()> {
    let mut buf = Vec::new();
    {
        let mut w = Writer::new(&mut buf);
        w.write_raw(PACKAGE_MAGIC)?;
        w.write_u32(entries.len() as u32)?;
        for (name, data) in entries {
            w.write_string(name)?;
            w.write_u32(data.len() as u32)?;
            w.write_blob(&deflate(data)?)?;
        }
    }
    atomic_write(bundle, &buf)?;
    Ok(())
}

/// Read a package back into (filename, contents) pairs.
pub fn read_package(bundle: &Path) -> SaveResult<Vec<(String, Vec<u8>)>> {
    let data = std::fs::read(bundle).map_err(|e| SaveError::IoUnavailable {
        path: bundle.to_path_buf(),
        source: e,
    })?;

    let mut cur = Cursor::new(data);
    let mut r = Reader::new(&mut cur);

    let magic = r.read_raw(4).map_err(|e| e.with_path(bundle))?;
    if magic != PACKAGE_MAGIC {
        return Err(SaveError::MalformedStream {
            path: bundle.to_path_buf(),
            detail: "not a save package".to_string(),
        });
    }

    let count = r.read_u32().map_err(|e| e.with_path(bundle))?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = r.read_string().map_err(|e| e.with_path(bundle))?;
        let raw_len = r.read_u32().map_err(|e| e.with_path(bundle))?;
        let blob = r.read_blob().map_err(|e| e.with_path(bundle))?;
        entries.push((name, inflate(&blob, raw_len, bundle)?));
    }
    Ok(entries)
}
