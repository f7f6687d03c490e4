use crate::metadata::ImageInfo;
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
const PNG_READER_CAPACITY: usize = 64 * 1024;

/// Extensions the gallery indexes. Only PNG carries embedded text metadata;
/// the rest still show up in the library with empty records.
const LIBRARY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not a valid PNG file")]
    NotPng(PathBuf),
}

/// One library entry discovered on disk.
#[derive(Debug, Clone)]
pub struct ScannedImage {
    pub path: PathBuf,
    /// Modification time as epoch seconds; `None` when the filesystem
    /// refuses to report one.
    pub mtime: Option<i64>,
}

/// Reads the embedded text metadata of one image.
///
/// For PNG files this walks the tEXt/zTXt/iTXt chunks without touching pixel
/// data; every decodable key/value pair lands in the returned map (the keys
/// of interest downstream are `parameters`, `prompt`, and `workflow`).
/// Formats without text chunks yield an empty map.
pub fn read_image_info(path: &Path) -> Result<ImageInfo, ScanError> {
    if !has_extension(path, "png") {
        return Ok(ImageInfo::new());
    }

    let mut reader = BufReader::with_capacity(PNG_READER_CAPACITY, File::open(path)?);
    let mut signature = [0u8; 8];
    reader.read_exact(&mut signature)?;
    if signature != PNG_SIGNATURE {
        return Err(ScanError::NotPng(path.to_path_buf()));
    }

    let mut info = ImageInfo::new();
    loop {
        let length = match reader.read_u32::<BigEndian>() {
            Ok(length) => length,
            Err(_) => break, // EOF
        };
        let mut chunk_type = [0u8; 4];
        if reader.read_exact(&mut chunk_type).is_err() {
            break;
        }

        match &chunk_type {
            b"tEXt" | b"zTXt" | b"iTXt" => {
                let mut data = vec![0u8; length as usize];
                reader.read_exact(&mut data)?;
                reader.seek(SeekFrom::Current(4))?; // CRC

                if let Some((key, value)) = decode_text_chunk(&chunk_type, &data) {
                    info.insert(key, value);
                }
            }
            b"IEND" => break,
            _ => {
                reader.seek(SeekFrom::Current(length as i64 + 4))?;
            }
        }
    }

    Ok(info)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

fn decode_text_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Option<(String, String)> {
    let separator = data.iter().position(|&byte| byte == 0)?;
    let key = String::from_utf8(data[..separator].to_vec()).ok()?;
    let payload = &data[separator + 1..];

    let value = match chunk_type {
        b"tEXt" => String::from_utf8(payload.to_vec()).ok()?,
        b"zTXt" => decode_ztxt_payload(payload)?,
        b"iTXt" => decode_itxt_payload(payload)?,
        _ => return None,
    };
    Some((key, value))
}

fn decode_ztxt_payload(payload: &[u8]) -> Option<String> {
    let (&method, mut compressed) = payload.split_first()?;
    if method != 0 {
        return None;
    }
    // Some writers insert a stray separator byte before the zlib stream.
    if compressed.first() == Some(&0) {
        compressed = &compressed[1..];
    }
    inflate_to_string(compressed)
}

fn decode_itxt_payload(payload: &[u8]) -> Option<String> {
    if payload.len() < 2 {
        return None;
    }
    let compression_flag = payload[0];
    let compression_method = payload[1];

    // Skip the language tag and translated keyword, both NUL-terminated.
    let rest = &payload[2..];
    let language_end = rest.iter().position(|&byte| byte == 0)?;
    let rest = &rest[language_end + 1..];
    let translated_end = rest.iter().position(|&byte| byte == 0)?;
    let text = &rest[translated_end + 1..];

    match (compression_flag, compression_method) {
        (0, _) => String::from_utf8(text.to_vec()).ok(),
        (1, 0) => inflate_to_string(text),
        _ => None,
    }
}

fn inflate_to_string(data: &[u8]) -> Option<String> {
    let mut output = String::new();
    ZlibDecoder::new(data).read_to_string(&mut output).ok()?;
    Some(output)
}

/// Walks the library folder and lists supported images, newest first.
pub fn scan_library(dir: &Path) -> Vec<ScannedImage> {
    let mut images = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| {
                let lowered = value.to_ascii_lowercase();
                LIBRARY_EXTENSIONS.contains(&lowered.as_str())
            })
            .unwrap_or(false);
        if !supported {
            continue;
        }

        let mtime = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64);
        images.push(ScannedImage {
            path: path.to_path_buf(),
            mtime,
        });
    }

    images.sort_by_key(|image| std::cmp::Reverse(image.mtime));
    images
}
