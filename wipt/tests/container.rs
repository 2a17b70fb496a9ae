// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use assert_matches::assert_matches;
use tar::{Archive, Builder, EntryType, Header};
use tempfile::TempDir;
use wipt::{
    container::{
        self, ContainerKind,
        rewrap::{self, OutputSpec},
        unwrap,
    },
    format::compression::{CompressedFormat, CompressedReader, CompressedWriter},
    log::{MemoryLogSink, Severity},
    workspace::Workspace,
};

const LONG_NAME: &str = "meta-data/very/deeply/nested/directory/structure/that/does/not/fit/\
    into/a/plain/ustar/header/firmware-info.txt";

#[derive(Debug, PartialEq, Eq)]
struct ReadMember {
    name: String,
    entry_type: EntryType,
    link_name: Option<String>,
    data: Vec<u8>,
}

enum Fixture<'a> {
    File(&'a str, &'a [u8]),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
}

fn write_tar(path: &Path, members: &[Fixture]) {
    let mut builder = Builder::new(File::create(path).unwrap());

    for member in members {
        let mut header = Header::new_gnu();
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);

        match member {
            Fixture::File(name, data) => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, *data).unwrap();
            }
            Fixture::Dir(name) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, name, io::empty()).unwrap();
            }
            Fixture::Symlink(name, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, name, target).unwrap();
            }
        }
    }

    builder.into_inner().unwrap().flush().unwrap();
}

fn read_tar(reader: impl Read) -> Vec<ReadMember> {
    let mut archive = Archive::new(reader);
    let mut result = vec![];

    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let mut data = vec![];
        entry.read_to_end(&mut data).unwrap();

        result.push(ReadMember {
            name: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            entry_type: entry.header().entry_type(),
            link_name: entry
                .link_name_bytes()
                .map(|l| String::from_utf8_lossy(&l).into_owned()),
            data,
        });
    }

    result
}

fn lz4_compress(data: &[u8]) -> Vec<u8> {
    let mut writer = CompressedWriter::new(Vec::new(), CompressedFormat::Lz4);
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

fn lz4_decompress(data: &[u8]) -> Vec<u8> {
    let mut reader = CompressedReader::with_format(data, CompressedFormat::Lz4);
    let mut result = vec![];
    reader.read_to_end(&mut result).unwrap();
    result
}

fn fake_image(tag: &str, len: usize) -> Vec<u8> {
    let mut data = b"ANDROID!".to_vec();
    data.extend(tag.bytes().cycle().take(len));
    data
}

fn output_spec(dir: &Path) -> OutputSpec {
    OutputSpec {
        dir: dir.join("out"),
        file_name: None,
        overwrite: false,
    }
}

/// Unwrap `input`, replace the raw image with `patched`, and rewrap.
fn round_trip(temp: &TempDir, input: &Path, patched: &[u8]) -> (PathBuf, container::ExtractedImage) {
    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(&temp.path().join("work"))).unwrap();

    let kind = container::detect(input);
    let extracted = unwrap::unwrap(input, kind, &workspace, &sink, &cancel_signal).unwrap();

    let patched_path = workspace.path().join("patched.img");
    fs::write(&patched_path, patched).unwrap();

    let output = rewrap::rewrap(
        &patched_path,
        input,
        extracted.origin,
        extracted.member_name.as_deref(),
        &output_spec(temp.path()),
        &sink,
        &cancel_signal,
    )
    .unwrap();

    workspace.close(&sink);

    (output, extracted)
}

#[test]
fn raw_image_unchanged() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.img");
    let data = fake_image("raw", 40_000);
    fs::write(&input, &data).unwrap();

    let (output, extracted) = round_trip(&temp, &input, &data);

    assert_eq!(extracted.origin, ContainerKind::RawImage);
    assert_eq!(extracted.member_name, None);
    assert_eq!(output, temp.path().join("out").join("boot_patched.img"));
    assert_eq!(fs::read(&output).unwrap(), data);
    // The input is never touched.
    assert_eq!(fs::read(&input).unwrap(), data);
}

#[test]
fn compressed_image() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.img.lz4");
    let original = fake_image("lz4", 100_000);
    fs::write(&input, lz4_compress(&original)).unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    let extracted = unwrap::unwrap(
        &input,
        ContainerKind::CompressedImage,
        &workspace,
        &sink,
        &cancel_signal,
    )
    .unwrap();
    assert_eq!(util_name(&extracted.raw_image), "boot.img");
    assert_eq!(fs::read(&extracted.raw_image).unwrap(), original);
    workspace.close(&sink);

    let patched = fake_image("patched", 120_000);
    let (output, _) = round_trip(&temp, &input, &patched);

    assert_eq!(util_name(&output), "boot_patched.img.lz4");
    assert_eq!(lz4_decompress(&fs::read(&output).unwrap()), patched);
}

fn util_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

fn archive_fixture<'a>(boot: &'a [u8], dtbo: &'a [u8]) -> Vec<Fixture<'a>> {
    vec![
        Fixture::Dir("images/"),
        Fixture::File("dtbo.img", dtbo),
        Fixture::File(LONG_NAME, b"build info"),
        Fixture::File("boot.img", boot),
        Fixture::Symlink("boot-link.img", "boot.img"),
        Fixture::File("vbmeta.img", b"AVB0 vbmeta"),
    ]
}

fn check_rebuilt(original: &[ReadMember], rebuilt: &[ReadMember], member: &str, patched: &[u8]) {
    assert_eq!(
        original.iter().map(|m| &m.name).collect::<Vec<_>>(),
        rebuilt.iter().map(|m| &m.name).collect::<Vec<_>>(),
    );

    for (old, new) in original.iter().zip(rebuilt) {
        if old.name == member {
            assert_eq!(new.entry_type, EntryType::Regular);
            assert_eq!(new.data, patched);
        } else {
            assert_eq!(old, new);
        }
    }
}

#[test]
fn archive_member_replaced() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("firmware.tar");
    let boot = fake_image("boot", 30_000);
    let dtbo = fake_image("dtbo", 5_000);
    write_tar(&input, &archive_fixture(&boot, &dtbo));

    // Different size than the original to check that the header is updated.
    let patched = fake_image("rooted", 45_123);
    let (output, extracted) = round_trip(&temp, &input, &patched);

    assert_eq!(extracted.origin, ContainerKind::Archive);
    assert_eq!(extracted.member_name.as_deref(), Some("boot.img"));
    assert_eq!(util_name(&output), "firmware_patched.tar");

    let original = read_tar(File::open(&input).unwrap());
    let rebuilt = read_tar(File::open(&output).unwrap());
    check_rebuilt(&original, &rebuilt, "boot.img", &patched);

    let long = rebuilt.iter().find(|m| m.name == LONG_NAME).unwrap();
    assert_eq!(long.data, b"build info");
    let link = rebuilt.iter().find(|m| m.name == "boot-link.img").unwrap();
    assert_eq!(link.link_name.as_deref(), Some("boot.img"));
}

#[test]
fn compressed_archive_member_replaced() {
    let temp = TempDir::new().unwrap();
    let boot = fake_image("boot", 64_000);
    let dtbo = fake_image("dtbo", 8_000);

    let plain = temp.path().join("plain.tar");
    write_tar(&plain, &archive_fixture(&boot, &dtbo));
    let plain_data = fs::read(&plain).unwrap();

    let input = temp.path().join("AP_firmware.tar.lz4");
    fs::write(&input, lz4_compress(&plain_data)).unwrap();

    let patched = fake_image("rooted", 70_001);
    let (output, extracted) = round_trip(&temp, &input, &patched);

    assert_eq!(extracted.origin, ContainerKind::CompressedArchive);
    assert_eq!(util_name(&output), "AP_firmware_patched.tar.lz4");

    let rebuilt_data = lz4_decompress(&fs::read(&output).unwrap());
    let original = read_tar(plain_data.as_slice());
    let rebuilt = read_tar(rebuilt_data.as_slice());
    check_rebuilt(&original, &rebuilt, "boot.img", &patched);

    // The decompressed temporary archive is cleaned up with the workspace.
    assert_eq!(fs::read_dir(temp.path().join("work")).unwrap().count(), 0);
}

/// Raw tar stream writer for the header shapes GNU tar and pax tools produce.
/// The tar crate's builder never writes some of these, so the headers are
/// assembled by hand.
#[derive(Default)]
struct RawTar(Vec<u8>);

const BLOCK: usize = 512;

fn octal(field: &mut [u8], value: u64) {
    let digits = format!("{value:0width$o}", width = field.len() - 1);
    field[..digits.len()].copy_from_slice(digits.as_bytes());
    field[digits.len()] = 0;
}

fn raw_header(gnu: bool, name: &str, typeflag: u8, size: u64, link: &str) -> [u8; BLOCK] {
    let mut block = [0u8; BLOCK];
    block[..name.len()].copy_from_slice(name.as_bytes());
    octal(&mut block[100..108], 0o644);
    octal(&mut block[108..116], 0);
    octal(&mut block[116..124], 0);
    octal(&mut block[124..136], size);
    octal(&mut block[136..148], 1_700_000_000);
    block[156] = typeflag;
    block[157..157 + link.len()].copy_from_slice(link.as_bytes());
    if gnu {
        block[257..265].copy_from_slice(b"ustar  \0");
    } else {
        block[257..265].copy_from_slice(b"ustar\x0000");
    }
    block
}

impl RawTar {
    fn push(&mut self, mut block: [u8; BLOCK], data: &[u8]) {
        block[148..156].fill(b' ');
        let sum = block.iter().map(|b| u64::from(*b)).sum::<u64>();
        block[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());

        self.0.extend_from_slice(&block);
        self.0.extend_from_slice(data);
        self.0.resize(self.0.len().div_ceil(BLOCK) * BLOCK, 0);
    }

    fn file(&mut self, gnu: bool, name: &str, typeflag: u8, data: &[u8], link: &str) {
        let block = raw_header(gnu, name, typeflag, data.len() as u64, link);
        self.push(block, data);
    }

    /// GNU `L`/`K` records carry the name with a trailing NUL.
    fn gnu_long(&mut self, typeflag: u8, value: &str) {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.file(true, "././@LongLink", typeflag, &data, "");
    }

    fn pax_path(&mut self, path: &str) {
        let body = format!(" path={path}\n");
        let mut len = body.len() + 1;
        while format!("{len}").len() + body.len() != len {
            len += 1;
        }
        let record = format!("{len}{body}");
        self.file(false, "PaxHeaders/member", b'x', record.as_bytes(), "");
    }

    /// GNU sparse member whose only data block sits after a hole.
    fn sparse(&mut self, name: &str, hole: u64, data: &[u8]) {
        let mut block = raw_header(true, name, b'S', data.len() as u64, "");
        octal(&mut block[386..398], hole);
        octal(&mut block[398..410], data.len() as u64);
        octal(&mut block[483..495], hole + data.len() as u64);
        self.push(block, data);
    }

    fn finish(mut self) -> Vec<u8> {
        self.0.resize(self.0.len() + 2 * BLOCK, 0);
        self.0
    }
}

const PAX_NAME: &str = "meta-data/pax/records/carry/this/path/because/it/is/longer/than/\
    the/one/hundred/byte/ustar/name/field/fota.zip";
const LONG_LINK_NAME: &str = "images/links/with/a/name/long/enough/to/need/a/gnu/longname/\
    record/in/front/of/it/and/then/some/vendor_boot.img";
const LONG_LINK_TARGET: &str = "../../../../../../../../../../../../firmware/partitions/\
    target/that/also/needs/its/own/record/vendor_boot.img";

fn gnu_tar_fixture(boot: &[u8], sparse_boot: bool) -> Vec<u8> {
    let mut tar = RawTar::default();

    tar.pax_path(PAX_NAME);
    tar.file(false, &PAX_NAME[..99], b'0', b"pax member", "");
    tar.gnu_long(b'L', LONG_LINK_NAME);
    tar.gnu_long(b'K', LONG_LINK_TARGET);
    tar.file(true, &LONG_LINK_NAME[..99], b'2', b"", &LONG_LINK_TARGET[..99]);
    tar.file(true, "dtbo.img", b'0', b"dtbo contents", "");
    tar.file(true, "dtbo-hardlink.img", b'1', b"", "dtbo.img");
    if sparse_boot {
        tar.sparse("boot.img", 4096, boot);
    } else {
        tar.file(true, "boot.img", b'0', boot, "");
    }
    tar.sparse("sparse.bin", 200_000, b"z\n");
    tar.file(true, "vbmeta.img", b'0', b"AVB0", "");

    tar.finish()
}

#[test]
fn gnu_and_pax_archive_member_replaced() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("firmware.tar");
    fs::write(&input, gnu_tar_fixture(&fake_image("boot", 3_000), false)).unwrap();

    let original = read_tar(File::open(&input).unwrap());
    assert_eq!(
        original.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        [
            PAX_NAME,
            LONG_LINK_NAME,
            "dtbo.img",
            "dtbo-hardlink.img",
            "boot.img",
            "sparse.bin",
            "vbmeta.img",
        ],
    );

    let patched = fake_image("rooted", 9_999);
    let (output, extracted) = round_trip(&temp, &input, &patched);
    assert_eq!(extracted.member_name.as_deref(), Some("boot.img"));

    let rebuilt = read_tar(File::open(&output).unwrap());
    assert_eq!(original.len(), rebuilt.len());

    for (old, new) in original.iter().zip(&rebuilt) {
        assert_eq!(old.name, new.name);
        assert_eq!(old.link_name, new.link_name);

        match old.name.as_str() {
            "boot.img" => assert_eq!(new.data, patched),
            "sparse.bin" => {
                assert_eq!(old.entry_type, EntryType::GNUSparse);
                assert_eq!(new.entry_type, EntryType::Regular);
                assert_eq!(new.data.len(), 200_002);
                assert_eq!(new.data, old.data);
            }
            _ => assert_eq!(old, new),
        }
    }

    let link = rebuilt.iter().find(|m| m.name == LONG_LINK_NAME).unwrap();
    assert_eq!(link.entry_type, EntryType::Symlink);
    assert_eq!(link.link_name.as_deref(), Some(LONG_LINK_TARGET));
    let hardlink = rebuilt.iter().find(|m| m.name == "dtbo-hardlink.img").unwrap();
    assert_eq!(hardlink.entry_type, EntryType::Link);
    assert_eq!(hardlink.link_name.as_deref(), Some("dtbo.img"));
}

#[test]
fn sparse_boot_member_replaced() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("firmware.tar");
    let boot = fake_image("boot", 1_000);
    fs::write(&input, gnu_tar_fixture(&boot, true)).unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    let extracted =
        unwrap::unwrap(&input, ContainerKind::Archive, &workspace, &sink, &cancel_signal).unwrap();
    let mut expected = vec![0u8; 4096];
    expected.extend(&boot);
    assert_eq!(fs::read(&extracted.raw_image).unwrap(), expected);
    workspace.close(&sink);

    let patched = fake_image("rooted", 2_345);
    let (output, _) = round_trip(&temp, &input, &patched);

    let rebuilt = read_tar(File::open(&output).unwrap());
    let member = rebuilt.iter().find(|m| m.name == "boot.img").unwrap();
    assert_eq!(member.entry_type, EntryType::Regular);
    assert_eq!(member.data, patched);
}

#[test]
fn archive_fallback_member() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("images.tar");
    let image = fake_image("vendor", 1_000);
    write_tar(
        &input,
        &[
            Fixture::File("notes.txt", b"hello"),
            Fixture::File("firmware/vendor_boot.img", &image),
            Fixture::File("dtbo.img", b"dtbo"),
        ],
    );

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    let extracted =
        unwrap::unwrap(&input, ContainerKind::Archive, &workspace, &sink, &cancel_signal).unwrap();

    assert_eq!(
        extracted.member_name.as_deref(),
        Some("firmware/vendor_boot.img"),
    );
    assert_eq!(util_name(&extracted.raw_image), "vendor_boot.img");
    assert_eq!(fs::read(&extracted.raw_image).unwrap(), image);
    assert!(sink.contains(Severity::Warning, "vendor_boot.img"));
}

#[test]
fn archive_without_boot_image() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("docs.tar");
    write_tar(&input, &[Fixture::File("README.txt", b"no images here")]);

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    assert_matches!(
        unwrap::unwrap(&input, ContainerKind::Archive, &workspace, &sink, &cancel_signal),
        Err(unwrap::Error::NoBootImage(p)) if p == input
    );
}

#[test]
fn empty_image_rejected() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.img");
    fs::write(&input, b"").unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    assert_matches!(
        unwrap::unwrap(&input, ContainerKind::RawImage, &workspace, &sink, &cancel_signal),
        Err(unwrap::Error::EmptyImage(_))
    );
}

#[test]
fn unknown_container_rejected() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.bin");
    fs::write(&input, b"ANDROID!").unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    assert_eq!(container::detect(&input), ContainerKind::Unknown);
    assert_matches!(
        unwrap::unwrap(&input, ContainerKind::Unknown, &workspace, &sink, &cancel_signal),
        Err(unwrap::Error::Unsupported { kind: ContainerKind::Unknown, .. })
    );
    // Rejected before anything is written to the workspace.
    assert!(!workspace.path().join(unwrap::EXTRACT_DIR).exists());
    assert!(!sink.contains(Severity::Info, "Unpacking"));
    assert_matches!(
        rewrap::rewrap(
            &input,
            &input,
            ContainerKind::Unknown,
            None,
            &output_spec(temp.path()),
            &sink,
            &cancel_signal,
        ),
        Err(rewrap::Error::Unsupported { .. })
    );
}

#[test]
fn overwrite_policy() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("recovery.img");
    let patched = temp.path().join("patched.img");
    fs::write(&input, b"original").unwrap();
    fs::write(&patched, b"patched").unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let mut spec = output_spec(temp.path());
    fs::create_dir_all(&spec.dir).unwrap();

    let target = spec.dir.join("recovery_patched.img");
    fs::write(&target, b"existing").unwrap();

    assert_matches!(
        rewrap::rewrap(
            &patched,
            &input,
            ContainerKind::RawImage,
            None,
            &spec,
            &sink,
            &cancel_signal,
        ),
        Err(rewrap::Error::AlreadyExists(p)) if p == target
    );
    assert_eq!(fs::read(&target).unwrap(), b"existing");

    spec.overwrite = true;
    let output = rewrap::rewrap(
        &patched,
        &input,
        ContainerKind::RawImage,
        None,
        &spec,
        &sink,
        &cancel_signal,
    )
    .unwrap();

    assert_eq!(output, target);
    assert_eq!(fs::read(&target).unwrap(), b"patched");
    assert!(sink.contains(Severity::Warning, "Overwriting"));
}

#[test]
fn output_name_override() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.img");
    fs::write(&input, b"ANDROID!").unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let spec = OutputSpec {
        file_name: Some("magisk_patched.img".to_owned()),
        ..output_spec(temp.path())
    };

    let output = rewrap::rewrap(
        &input,
        &input,
        ContainerKind::RawImage,
        None,
        &spec,
        &sink,
        &cancel_signal,
    )
    .unwrap();

    assert_eq!(output, temp.path().join("out").join("magisk_patched.img"));
}

#[test]
fn rewrap_missing_member() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("firmware.tar");
    write_tar(&input, &[Fixture::File("boot.img", b"ANDROID!")]);
    let patched = temp.path().join("patched.img");
    fs::write(&patched, b"patched").unwrap();

    let cancel_signal = AtomicBool::new(false);
    let sink = MemoryLogSink::new();
    let spec = output_spec(temp.path());

    assert_matches!(
        rewrap::rewrap(
            &patched,
            &input,
            ContainerKind::Archive,
            Some("init_boot.img"),
            &spec,
            &sink,
            &cancel_signal,
        ),
        Err(rewrap::Error::Archive(_, _))
    );
    assert_matches!(
        rewrap::rewrap(
            &patched,
            &input,
            ContainerKind::Archive,
            None,
            &spec,
            &sink,
            &cancel_signal,
        ),
        Err(rewrap::Error::NoMemberName(ContainerKind::Archive))
    );

    // Nothing is left behind on failure.
    assert_eq!(fs::read_dir(&spec.dir).unwrap().count(), 0);
}

#[test]
fn cancelled_copy() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("boot.img");
    fs::write(&input, b"ANDROID!").unwrap();

    let cancel_signal = AtomicBool::new(true);
    let sink = MemoryLogSink::new();
    let workspace = Workspace::new(Some(temp.path())).unwrap();

    assert_matches!(
        unwrap::unwrap(&input, ContainerKind::RawImage, &workspace, &sink, &cancel_signal),
        Err(unwrap::Error::File(_, e)) if e.kind() == io::ErrorKind::Interrupted
    );
}
