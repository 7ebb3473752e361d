use super::*;
use crate::endpoint::{Endpoint, Reference};

fn user() -> UserName {
    UserName::parse("ann@example.com").unwrap()
}

fn block(offset: i64, size: i64) -> Block {
    Block {
        offset,
        size,
        location: Location::new(Endpoint::in_process(), Reference::new(format!("ref-{offset}"))),
        packdata: vec![1, 2, 3],
    }
}

fn file_entry(name: &str, blocks: Vec<Block>) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        signed_name: name.to_string(),
        attr: Attr::None,
        packing: Packing::Plain,
        sequence: SEQ_BASE,
        time: Time(1_700_000_000),
        writer: "ann@example.com".to_string(),
        blocks,
        packdata: vec![9],
        link: None,
    }
}

#[test]
fn test_marshal_round_trip() {
    let entry = file_entry("ann@example.com/dir/file", vec![block(0, 10), block(10, 4)]);
    let blob = entry.marshal().unwrap();
    let again = DirEntry::unmarshal(&blob).unwrap();
    assert_eq!(entry, again);
}

#[test]
fn test_size_of_contiguous_blocks() {
    let entry = file_entry("ann@example.com/f", vec![block(0, 10), block(10, 5)]);
    assert_eq!(entry.size().unwrap(), 15);

    let empty = file_entry("ann@example.com/f", vec![]);
    assert_eq!(empty.size().unwrap(), 0);
}

#[test]
fn test_unmarshal_rejects_gapped_blocks() {
    let entry = file_entry("ann@example.com/f", vec![block(0, 10), block(11, 5)]);
    let blob = serde_json::to_vec(&entry).unwrap();
    let err = DirEntry::unmarshal(&blob).unwrap_err();
    assert!(err.is(crate::errors::Kind::Invalid));
}

#[test]
fn test_unmarshal_rejects_bad_name() {
    let entry = file_entry("not-a-path", vec![]);
    let blob = serde_json::to_vec(&entry).unwrap();
    assert!(DirEntry::unmarshal(&blob).is_err());
}

#[test]
fn test_unmarshal_rejects_directory_with_blocks() {
    let mut entry = file_entry("ann@example.com/d", vec![block(0, 1)]);
    entry.attr = Attr::Directory;
    let blob = serde_json::to_vec(&entry).unwrap();
    assert!(DirEntry::unmarshal(&blob).is_err());
}

#[test]
fn test_unmarshal_rejects_corrupt_blob() {
    let err = DirEntry::unmarshal(b"{ not json").unwrap_err();
    assert_eq!(err.kind, crate::errors::Kind::IO);
}

#[test]
fn test_link_validation() {
    let mut link = file_entry("ann@example.com/l", vec![]);
    link.attr = Attr::Link;
    assert!(link.validate("test").is_err());

    link.link = Some("ann@example.com/target".to_string());
    assert!(link.validate("test").is_ok());
}

#[test]
fn test_incomplete_copy_strips_locations_and_packdata() {
    let entry = file_entry("ann@example.com/f", vec![block(0, 10)]);
    let stripped = entry.incomplete_copy();

    assert_eq!(stripped.attr, Attr::Incomplete);
    assert!(stripped.packdata.is_empty());
    assert_eq!(stripped.blocks.len(), 1);
    assert_eq!(stripped.blocks[0].location, Location::unassigned());
    assert!(stripped.blocks[0].packdata.is_empty());
    assert_eq!(stripped.blocks[0].size, 10);

    let dir = DirEntry::directory(&crate::path::parse("ann@example.com/d").unwrap(), &user());
    assert_eq!(dir.incomplete_copy().attr, Attr::Directory);
}
