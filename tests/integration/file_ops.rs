use std::io::SeekFrom;

use lockfs::stress::read_to_end;
use lockfs::{FileType, FsError, LockFs, MemFs, OpenFlags};

fn fs_with(path: &str, data: &[u8]) -> LockFs<MemFs> {
    let fs = LockFs::new(MemFs::new());
    fs.write_file(path, data, 0o644).unwrap();
    fs
}

#[test]
fn test_seek_and_read() {
    let fs = LockFs::new(MemFs::new());
    let f = fs.create("/s").unwrap();
    f.write(b"0123456789").unwrap();

    assert_eq!(f.seek(SeekFrom::Start(2)).unwrap(), 2);
    let mut buf = [0u8; 3];
    assert_eq!(f.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"234");

    assert_eq!(f.seek(SeekFrom::Current(-1)).unwrap(), 4);
    assert_eq!(f.seek(SeekFrom::End(-2)).unwrap(), 8);
    assert_eq!(read_to_end(&f).unwrap(), b"89");
    assert_eq!(f.read(&mut buf).unwrap(), 0);

    let err = f.seek(SeekFrom::Current(-100)).unwrap_err();
    assert!(matches!(err, FsError::InvalidInput { .. }), "got {:?}", err);
}

#[test]
fn test_read_at_leaves_cursor() {
    let fs = fs_with("/f", b"abcdef");
    let f = fs.open("/f").unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(f.read_at(&mut buf, 3).unwrap(), 2);
    assert_eq!(&buf, b"de");
    assert_eq!(f.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf, b"ab");

    // Past the end reads nothing.
    assert_eq!(f.read_at(&mut buf, 100).unwrap(), 0);
}

#[test]
fn test_write_at_zero_fills_gap() {
    let fs = LockFs::new(MemFs::new());
    let f = fs.create("/g").unwrap();
    f.write_at(b"xy", 4).unwrap();
    f.close().unwrap();
    assert_eq!(fs.read_file("/g").unwrap(), b"\0\0\0\0xy");
}

#[test]
fn test_append_mode_writes_at_end() {
    let fs = fs_with("/log", b"a");
    let f = fs
        .open_file("/log", OpenFlags::WRITE_ONLY | OpenFlags::APPEND, 0)
        .unwrap();
    f.write(b"b").unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write_str("c").unwrap();
    f.close().unwrap();
    assert_eq!(fs.read_file("/log").unwrap(), b"abc");
}

#[test]
fn test_access_mode_enforced() {
    let fs = fs_with("/ro", b"data");

    let f = fs.open("/ro").unwrap();
    let err = f.write(b"x").unwrap_err();
    assert!(matches!(err, FsError::PermissionDenied { .. }), "got {:?}", err);

    let f = fs.open_file("/ro", OpenFlags::WRITE_ONLY, 0).unwrap();
    let mut buf = [0u8; 4];
    let err = f.read(&mut buf).unwrap_err();
    assert!(matches!(err, FsError::PermissionDenied { .. }), "got {:?}", err);
}

#[test]
fn test_use_after_close() {
    let fs = fs_with("/c", b"data");
    let f = fs.open("/c").unwrap();
    f.close().unwrap();

    let mut buf = [0u8; 4];
    assert!(f.read(&mut buf).unwrap_err().is_closed());
    assert!(f.stat().unwrap_err().is_closed());
    assert!(f.close().unwrap_err().is_closed());
    assert_eq!(f.name(), "/c");
}

#[test]
fn test_directory_iteration_in_batches() {
    let fs = LockFs::new(MemFs::new());
    fs.mkdir("/d", 0o755).unwrap();
    for name in ["c", "a", "b"] {
        fs.write_file(&format!("/d/{}", name), name.as_bytes(), 0o644).unwrap();
    }
    fs.mkdir("/d/sub", 0o755).unwrap();

    let d = fs.open("/d").unwrap();
    assert_eq!(d.readdir_names(Some(2)).unwrap(), vec!["a", "b"]);
    assert_eq!(d.readdir_names(Some(2)).unwrap(), vec!["c", "sub"]);
    assert!(d.readdir_names(Some(2)).unwrap().is_empty());

    let d = fs.open("/d").unwrap();
    let all = d.readdir(None).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].name, "a");
    assert_eq!(all[0].size, 1);
    assert!(d.readdir(None).unwrap().is_empty());

    let d = fs.open("/d").unwrap();
    let entries = d.read_dir(None).unwrap();
    assert_eq!(entries[3].name, "sub");
    assert_eq!(entries[3].file_type, FileType::Directory);
}

#[test]
fn test_directory_calls_on_files_and_files_calls_on_directories() {
    let fs = fs_with("/f", b"data");
    fs.mkdir("/d", 0o755).unwrap();

    let f = fs.open("/f").unwrap();
    let err = f.readdir(None).unwrap_err();
    assert!(matches!(err, FsError::NotADirectory { .. }), "got {:?}", err);

    let err = fs.open_file("/d", OpenFlags::WRITE_ONLY, 0).unwrap_err();
    assert!(matches!(err, FsError::IsADirectory { .. }), "got {:?}", err);

    let d = fs.open("/d").unwrap();
    let mut buf = [0u8; 1];
    let err = d.read(&mut buf).unwrap_err();
    assert!(matches!(err, FsError::IsADirectory { .. }), "got {:?}", err);
}

#[test]
fn test_handle_stat_and_truncate() {
    let fs = LockFs::new(MemFs::new());
    let f = fs.create("/w").unwrap();
    f.write(b"0123456789").unwrap();
    let meta = f.stat().unwrap();
    assert_eq!(meta.name, "w");
    assert_eq!(meta.size, 10);
    assert_eq!(fs.stat("/w").unwrap().size, 10);

    f.truncate(4).unwrap();
    f.sync().unwrap();
    assert_eq!(fs.read_file("/w").unwrap(), b"0123");
}

/// A removed file stays readable through a handle opened before the remove.
#[test]
fn test_open_handle_survives_remove() {
    let fs = fs_with("/gone", b"still here");
    let f = fs.open("/gone").unwrap();
    fs.remove("/gone").unwrap();
    assert_eq!(read_to_end(&f).unwrap(), b"still here");
}

/// Dropping the filesystem wrapper leaves open handles usable.
#[test]
fn test_handle_outlives_wrapper() {
    let f = {
        let fs = fs_with("/k", b"kept");
        fs.open("/k").unwrap()
    };
    assert_eq!(read_to_end(&f).unwrap(), b"kept");
    f.close().unwrap();
}

/// Offsets and sizes past what memory can hold are rejected, and the file is
/// left as it was.
#[test]
fn test_out_of_range_offsets_are_rejected() {
    let fs = fs_with("/big", b"keep");
    let f = fs.open_file("/big", OpenFlags::READ_WRITE, 0).unwrap();

    let err = f.write_at(b"x", u64::MAX).unwrap_err();
    assert!(matches!(err, FsError::InvalidInput { .. }), "got {:?}", err);

    assert_eq!(f.seek(SeekFrom::Start(u64::MAX)).unwrap(), u64::MAX);
    let err = f.write(b"x").unwrap_err();
    assert!(matches!(err, FsError::InvalidInput { .. }), "got {:?}", err);

    let err = f.truncate(u64::MAX).unwrap_err();
    assert!(matches!(err, FsError::InvalidInput { .. }), "got {:?}", err);
    let err = fs.truncate("/big", u64::MAX).unwrap_err();
    assert!(matches!(err, FsError::InvalidInput { .. }), "got {:?}", err);

    assert_eq!(fs.read_file("/big").unwrap(), b"keep");
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write(b"K").unwrap();
    assert_eq!(fs.read_file("/big").unwrap(), b"Keep");
}

#[test]
fn test_handle_debug_shows_name() {
    let fs = fs_with("/named", b"");
    let f = fs.open("/named").unwrap();
    assert_eq!(format!("{:?}", f), "LockFile { name: \"/named\", .. }");
}
