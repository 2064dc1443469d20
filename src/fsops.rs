//! Plain sequential file copy and move, the way the course's standalone
//! utilities do it: fixed-size chunks, loud failures, no cleverness.

use anyhow::{Context, Result, bail};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const CHUNK_SIZE: usize = 4096;

/// Copy `src` to `dst` in fixed-size chunks.
///
/// `src` is opened read-only; `dst` is created if absent and truncated,
/// with read/write permission bits for everyone (subject to the umask).
/// A short write is treated as a hard error. Returns the number of bytes
/// transferred.
pub fn copy(src: &Path, dst: &Path) -> Result<u64> {
    let mut input =
        File::open(src).with_context(|| format!("cannot open {}", src.display()))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(dst)
        .with_context(|| format!("cannot create {}", dst.display()))?;

    let mut buf = [0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    loop {
        let read = input
            .read(&mut buf)
            .with_context(|| format!("read error on {}", src.display()))?;
        if read == 0 {
            break;
        }
        let written = output
            .write(&buf[..read])
            .with_context(|| format!("write error on {}", dst.display()))?;
        if written != read {
            bail!(
                "short write on {}: {} of {} bytes",
                dst.display(),
                written,
                read
            );
        }
        transferred += read as u64;
    }

    Ok(transferred)
}

/// Copy `src` to `dst`, then remove `src`.
pub fn move_file(src: &Path, dst: &Path) -> Result<u64> {
    let transferred = copy(src, dst)?;
    std::fs::remove_file(src).with_context(|| format!("cannot remove {}", src.display()))?;
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_unique_temp_dir(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("fsops_test_{}_{}_{}", tag, std::process::id(), nanos));
        fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn test_copy_preserves_content_and_truncates_target() {
        let tmp = make_unique_temp_dir("copy");
        let src = tmp.join("src.txt");
        let dst = tmp.join("dst.txt");
        fs::write(&src, b"hello\nworld\n").unwrap();
        fs::write(&dst, b"previous content that is much longer").unwrap();

        let transferred = copy(&src, &dst).unwrap();
        assert_eq!(transferred, 12);
        assert_eq!(fs::read(&dst).unwrap(), b"hello\nworld\n");
        assert!(src.exists());

        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let tmp = make_unique_temp_dir("missing");
        let res = copy(&tmp.join("absent"), &tmp.join("dst"));
        assert!(res.is_err());
        assert!(!tmp.join("dst").exists());
        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    fn test_move_removes_source() {
        let tmp = make_unique_temp_dir("move");
        let src = tmp.join("src.txt");
        let dst = tmp.join("dst.txt");
        fs::write(&src, b"payload").unwrap();

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");

        let _ = fs::remove_dir_all(tmp);
    }
}
