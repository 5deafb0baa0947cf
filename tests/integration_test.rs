use kcf::record::{FLAG_ADDED_DATA_CRC32, FLAG_CONTINUED};
use kcf::{
    Archive, ArchiveHeader, ArchiveOptions, FileInfo, FileType, KcfError, PackerState, Record,
    RecordType, UnpackerState,
};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use tempfile::{NamedTempFile, TempDir};

type MemArchive = Archive<Cursor<Vec<u8>>>;

fn packer() -> MemArchive {
    let mut ar = Archive::new(Cursor::new(Vec::new()));
    ar.init_archive().unwrap();
    ar
}

fn unpacker(ar: MemArchive) -> MemArchive {
    let bytes = ar.close().unwrap().into_inner();
    let mut ar = Archive::reader(Cursor::new(bytes));
    ar.read_archive_header().unwrap();
    ar
}

fn extract_all(ar: &mut MemArchive) -> Vec<(FileInfo, Vec<u8>)> {
    let mut out = Vec::new();
    loop {
        let info = match ar.get_current_file_info() {
            Ok(info) => info,
            Err(KcfError::Eof) => break,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let mut data = Vec::new();
        ar.extract(&mut data).unwrap();
        out.push((info, data));
    }
    out
}

/// Entry split over a FileHeader and two DataFragments, then a plain entry.
fn fragmented_archive() -> MemArchive {
    let mut ar = packer();
    let mut header = FileInfo::regular("split.bin").with_unpacked_size(12).to_record().unwrap();
    header.head_flags |= FLAG_CONTINUED | FLAG_ADDED_DATA_CRC32;
    ar.write_record_with_added_data(&mut header, b"abcd").unwrap();

    let mut middle = Record { head_type: RecordType::DataFragment, head_flags: FLAG_CONTINUED, ..Default::default() };
    ar.write_record_with_added_data(&mut middle, b"efgh").unwrap();
    let mut last = Record { head_type: RecordType::DataFragment, ..Default::default() };
    ar.write_record_with_added_data(&mut last, b"ijkl").unwrap();

    ar.add_file(&FileInfo::regular("next.txt").with_unpacked_size(2), b"ok").unwrap();
    ar
}

#[test]
fn test_pack_and_list() {
    let mut ar = packer();
    ar.add_file(&FileInfo::directory("docs"), &[]).unwrap();
    ar.add_file(
        &FileInfo::regular("docs/a.txt").with_unpacked_size(5).with_time_stamp(1_700_000_000),
        b"alpha",
    ).unwrap();
    ar.add_file(&FileInfo::regular("empty"), &[]).unwrap();

    let mut ar = unpacker(ar);
    let mut names = Vec::new();
    loop {
        match ar.get_current_file_info() {
            Ok(info) => names.push((info.file_name, info.file_type, info.time_stamp)),
            Err(KcfError::Eof) => break,
            Err(e) => panic!("{e}"),
        }
        ar.skip_file().unwrap();
    }
    assert_eq!(names, vec![
        ("docs".to_string(), FileType::Directory, None),
        ("docs/a.txt".to_string(), FileType::Regular, Some(1_700_000_000)),
        ("empty".to_string(), FileType::Regular, None),
    ]);
}

#[test]
fn test_pack_unpack_roundtrip() {
    let big: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let mut ar = Archive::with_options(
        Cursor::new(Vec::new()),
        ArchiveOptions { chunk_size: 4096, ..Default::default() },
    );
    ar.init_archive().unwrap();

    // size known up front
    ar.begin_file(&FileInfo::regular("big.bin").with_unpacked_size(big.len() as u64)).unwrap();
    assert_eq!(ar.insert_file_data(&mut big.as_slice()).unwrap(), big.len() as u64);
    ar.end_file().unwrap();

    // size left for the backpatch
    ar.begin_file(&FileInfo::regular("stream.log")).unwrap();
    assert_eq!(ar.current_file().unwrap().file_name, "stream.log");
    ar.insert_file_data(&mut &b"line one\nline two\n"[..]).unwrap();
    ar.end_file().unwrap();
    assert_eq!(ar.packer_state(), PackerState::FileHeader);

    let mut ar = unpacker(ar);
    let entries = extract_all(&mut ar);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.file_name, "big.bin");
    assert_eq!(entries[0].1, big);
    assert_eq!(entries[1].0.unpacked_size, None);
    assert_eq!(entries[1].1, b"line one\nline two\n");
}

#[test]
fn roundtrip_without_payload_crc() {
    let mut ar = Archive::with_options(
        Cursor::new(Vec::new()),
        ArchiveOptions { payload_crc: false, ..Default::default() },
    );
    ar.init_archive().unwrap();
    ar.begin_file(&FileInfo::regular("plain.txt").with_unpacked_size(5)).unwrap();
    ar.insert_file_data(&mut &b"plain"[..]).unwrap();
    ar.end_file().unwrap();

    let mut ar = unpacker(ar);
    let entries = extract_all(&mut ar);
    assert_eq!(entries[0].1, b"plain");
}

#[test]
fn extract_follows_fragments() {
    let mut ar = unpacker(fragmented_archive());
    let entries = extract_all(&mut ar);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.file_name, "split.bin");
    assert_eq!(entries[0].1, b"abcdefghijkl");
    assert_eq!(entries[1].1, b"ok");
}

#[test]
fn skip_file_follows_fragments() {
    let mut ar = unpacker(fragmented_archive());
    ar.skip_file().unwrap();
    assert_eq!(ar.unpacker_state(), UnpackerState::FileHeader);
    assert_eq!(ar.get_current_file_info().unwrap().file_name, "next.txt");
    ar.skip_file().unwrap();
    assert!(matches!(ar.get_current_file_info(), Err(KcfError::Eof)));
}

#[test]
fn skip_file_after_partial_read() {
    let mut ar = unpacker(fragmented_archive());
    let mut buf = [0u8; 6];
    ar.get_current_file_info().unwrap();
    assert_eq!(ar.read_file_data(&mut buf).unwrap(), 4);
    ar.skip_file().unwrap();
    let mut out = Vec::new();
    ar.extract(&mut out).unwrap();
    assert_eq!(out, b"ok");
}

#[test]
fn read_file_data_in_small_pieces() {
    let mut ar = unpacker(fragmented_archive());
    ar.get_current_file_info().unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = ar.read_file_data(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, b"abcdefghijkl");
    assert_eq!(ar.unpacker_state(), UnpackerState::AfterFileData);
    assert_eq!(ar.get_current_file_info().unwrap().file_name, "split.bin");
    ar.skip_file().unwrap();
    assert_eq!(ar.get_current_file_info().unwrap().file_name, "next.txt");
}

#[test]
fn cached_info_is_returned_without_io() {
    let mut ar = unpacker(fragmented_archive());
    let first = ar.get_current_file_info().unwrap();
    let pos = ar.get_ref().position();
    assert_eq!(ar.get_current_file_info().unwrap(), first);
    assert_eq!(ar.get_ref().position(), pos);
    assert_eq!(ar.unpacker_state(), UnpackerState::FileData);
}

#[test]
fn continuation_into_a_non_fragment_is_invalid_data() {
    let mut ar = packer();
    let mut header = FileInfo::regular("broken").to_record().unwrap();
    header.head_flags |= FLAG_CONTINUED;
    ar.write_record_with_added_data(&mut header, b"abc").unwrap();
    ar.add_file(&FileInfo::regular("intruder"), b"xyz").unwrap();

    let mut ar = unpacker(ar);
    let mut sink = Vec::new();
    assert!(matches!(ar.extract(&mut sink), Err(KcfError::InvalidData(_))));
}

#[test]
fn skip_file_rejects_non_fragment_continuation() {
    let mut ar = packer();
    let mut header = FileInfo::regular("broken").to_record().unwrap();
    header.head_flags |= FLAG_CONTINUED;
    ar.write_record_with_added_data(&mut header, b"abc").unwrap();
    ar.add_file(&FileInfo::regular("intruder"), b"xyz").unwrap();

    let mut ar = unpacker(ar);
    assert!(matches!(ar.skip_file(), Err(KcfError::InvalidData(_))));
}

#[test]
fn wrong_unpacked_size_is_detected() {
    let mut ar = packer();
    ar.add_file(&FileInfo::regular("liar.txt").with_unpacked_size(99), b"short").unwrap();
    let mut ar = unpacker(ar);
    let mut sink = Vec::new();
    assert!(matches!(ar.extract(&mut sink), Err(KcfError::InvalidData(_))));
}

#[test]
fn file_crc_is_verified() {
    let data = b"Hello, world!\r\n";
    let mut ar = packer();
    ar.add_file(&FileInfo::regular("good").with_file_crc32(0x5A69_6CE4), data).unwrap();
    ar.add_file(&FileInfo::regular("bad").with_file_crc32(0x1234_5678), data).unwrap();

    let mut ar = unpacker(ar);
    let mut sink = Vec::new();
    assert_eq!(ar.extract(&mut sink).unwrap(), 15);
    assert!(matches!(ar.extract(&mut sink), Err(KcfError::InvalidData(_))));
}

#[test]
fn archive_behind_a_prefix_is_found() {
    let mut ar = packer();
    ar.add_file(&FileInfo::regular("inner"), b"payload").unwrap();
    let mut bytes = b"#!/bin/sh\nexit 0\n".to_vec();
    bytes.extend(ar.close().unwrap().into_inner());

    let mut ar = Archive::reader(Cursor::new(bytes));
    assert_eq!(ar.read_archive_header().unwrap(), ArchiveHeader::default());
    let mut out = Vec::new();
    ar.extract(&mut out).unwrap();
    assert_eq!(out, b"payload");
}

#[test]
fn missing_marker_is_invalid_format() {
    let mut ar = Archive::reader(Cursor::new(b"not an archive at all".to_vec()));
    assert!(matches!(ar.read_archive_header(), Err(KcfError::InvalidFormat(_))));
}

#[test]
fn newer_archive_version_is_rejected() {
    let mut ar = Archive::new(Cursor::new(Vec::new()));
    ar.start_writing().unwrap();
    ar.write_record(&mut ArchiveHeader::new(2).to_record().unwrap()).unwrap();

    let mut ar = Archive::reader(Cursor::new(ar.close().unwrap().into_inner()));
    assert!(matches!(ar.read_archive_header(), Err(KcfError::InvalidFormat(_))));
}

#[test]
fn truncated_archive_reports_premature_eof() {
    let mut ar = packer();
    ar.add_file(&FileInfo::regular("hello.txt"), b"Hello, world!\r\n").unwrap();
    let mut bytes = ar.close().unwrap().into_inner();
    bytes.truncate(bytes.len() - 3);

    let mut ar = Archive::reader(Cursor::new(bytes));
    ar.read_archive_header().unwrap();
    let mut sink = Vec::new();
    assert!(matches!(ar.extract(&mut sink), Err(KcfError::PrematureEof)));
}

#[test]
fn unpacker_state_guards() {
    let mut ar = Archive::reader(Cursor::new(Vec::new()));
    let mut sink = Vec::new();
    assert!(matches!(ar.get_current_file_info(), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.skip_file(), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.extract(&mut sink), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.read_file_data(&mut [0u8; 4]), Err(KcfError::InvalidState(_))));
    assert_eq!(ar.unpacker_state(), UnpackerState::ValidatingFormat);

    let mut ar = unpacker(packer());
    assert!(matches!(ar.read_archive_header(), Err(KcfError::InvalidState(_))));
}

#[test]
fn packer_state_guards() {
    let mut ar = packer();
    assert!(matches!(ar.insert_file_data(&mut &b"x"[..]), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.end_file(), Err(KcfError::InvalidState(_))));

    ar.begin_file(&FileInfo::regular("a")).unwrap();
    assert!(matches!(ar.begin_file(&FileInfo::regular("b")), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.add_file(&FileInfo::regular("b"), b""), Err(KcfError::InvalidState(_))));
    assert!(matches!(ar.end_file(), Err(KcfError::InvalidState(_))));
    ar.insert_file_data(&mut &b"x"[..]).unwrap();
    assert_eq!(ar.packer_state(), PackerState::AfterFileData);
    assert!(matches!(ar.insert_file_data(&mut &b"y"[..]), Err(KcfError::InvalidState(_))));
    ar.end_file().unwrap();
    assert!(matches!(ar.init_archive(), Err(KcfError::InvalidState(_))));

    let mut reading = Archive::reader(Cursor::new(Vec::new()));
    assert!(matches!(reading.begin_file(&FileInfo::regular("c")), Err(KcfError::InvalidState(_))));
}

// ── File-backed archives ─────────────────────────────────────────────────────

#[test]
fn file_backed_archive_roundtrip() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("input.txt");
    fs::write(&src, b"Roundtrip test data for KCF").unwrap();

    let archive_path = NamedTempFile::new().unwrap().into_temp_path();
    {
        let mut ar = Archive::create(&archive_path).unwrap();
        ar.init_archive().unwrap();
        let len = fs::metadata(&src).unwrap().len();
        ar.begin_file(&FileInfo::regular("input.txt").with_unpacked_size(len)).unwrap();
        ar.insert_file_data(&mut File::open(&src).unwrap()).unwrap();
        ar.end_file().unwrap();
        ar.close().unwrap();
    }

    let mut ar = Archive::open(&archive_path).unwrap();
    ar.read_archive_header().unwrap();
    let info = ar.get_current_file_info().unwrap();
    assert_eq!(info.file_name, "input.txt");

    let out_path = dir.path().join("output.txt");
    {
        let mut out = File::create(&out_path).unwrap();
        ar.extract(&mut out).unwrap();
        out.flush().unwrap();
    }
    assert_eq!(fs::read(&out_path).unwrap(), b"Roundtrip test data for KCF");
    assert!(matches!(ar.get_current_file_info(), Err(KcfError::Eof)));
}

#[test]
fn opening_a_missing_file_is_file_not_found() {
    let dir = TempDir::new().unwrap();
    let result = Archive::open(dir.path().join("absent.kcf"));
    assert!(matches!(result, Err(KcfError::FileNotFound(_))));
}
