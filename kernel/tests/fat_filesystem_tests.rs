//! End-to-end tests for the FAT12/16/32 filesystem engine, exercised
//! through the public [`Filesystem`]/[`VfsNode`] vtable rather than the
//! crate-internal unit tests in `fs::fat`.

use exos_kernel::fs::fat;
use exos_kernel::fs::{Filesystem, NodeType, Permissions};

fn mounted() -> fat::FatFileSystem {
    fat::new_ram_backed(4096).expect("ram-backed FAT volume should format")
}

#[test]
fn fresh_volume_has_empty_root() {
    let fs = mounted();
    assert_eq!(fs.name(), "fat");
    assert!(!fs.is_readonly());
    assert_eq!(fs.root().readdir().unwrap().len(), 0);
}

#[test]
fn create_write_read_file_round_trips() {
    let fs = mounted();
    let root = fs.root();

    let file = root
        .create("readme.txt", Permissions::default())
        .expect("create should succeed");
    let written = file.write(0, b"hello exos fs").expect("write should succeed");
    assert_eq!(written, 13);

    let looked_up = root.lookup("readme.txt").expect("lookup should find the file");
    let mut buf = [0u8; 13];
    let read = looked_up.read(0, &mut buf).expect("read should succeed");
    assert_eq!(read, 13);
    assert_eq!(&buf, b"hello exos fs");
}

#[test]
fn long_file_name_survives_lookup() {
    let fs = mounted();
    let root = fs.root();

    let name = "a-rather-long-file-name-needing-lfn-entries.txt";
    root.create(name, Permissions::default())
        .expect("create with a long name should succeed");

    let entries = root.readdir().expect("readdir should succeed");
    assert!(entries.iter().any(|e| e.name == name));
    assert!(root.lookup(name).is_ok());
}

#[test]
fn directory_tree_nests_and_lists_correctly() {
    let fs = mounted();
    let root = fs.root();

    let docs = root
        .mkdir("docs", Permissions::default())
        .expect("mkdir should succeed");
    assert_eq!(docs.node_type(), NodeType::Directory);

    docs.create("a.txt", Permissions::default()).unwrap();
    docs.create("b.txt", Permissions::default()).unwrap();

    let mut names: Vec<String> = docs
        .readdir()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[test]
fn file_spanning_multiple_clusters_round_trips() {
    let fs = mounted();
    let root = fs.root();

    let file = root.create("big.bin", Permissions::default()).unwrap();
    let data: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    let written = file.write(0, &data).unwrap();
    assert_eq!(written, data.len());

    let looked_up = root.lookup("big.bin").unwrap();
    let mut buf = vec![0u8; data.len()];
    let read = looked_up.read(0, &mut buf).unwrap();
    assert_eq!(read, data.len());
    assert_eq!(buf, data);
}

#[test]
fn truncate_then_unlink() {
    let fs = mounted();
    let root = fs.root();

    let file = root.create("scratch.bin", Permissions::default()).unwrap();
    file.write(0, &vec![0xCCu8; 4096]).unwrap();
    file.truncate(100).unwrap();
    assert_eq!(file.metadata().unwrap().size, 100);

    root.unlink("scratch.bin").unwrap();
    assert!(root.lookup("scratch.bin").is_err());
}

#[test]
fn unlink_refuses_nonempty_directory() {
    let fs = mounted();
    let root = fs.root();

    let sub = root.mkdir("full", Permissions::default()).unwrap();
    sub.create("f.txt", Permissions::default()).unwrap();

    assert!(root.unlink("full").is_err());
}
