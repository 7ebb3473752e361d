use super::*;
use crate::errors::Kind;

#[test]
fn test_parse_root_with_and_without_slash() {
    let a = parse("ann@example.com").unwrap();
    let b = parse("ann@example.com/").unwrap();

    assert!(a.is_root());
    assert_eq!(a, b);
    assert_eq!(a.path(), "ann@example.com/");
    assert_eq!(a.nelem(), 0);
}

#[test]
fn test_parse_collapses_redundant_slashes() {
    let p = parse("ann@example.com//dir///file").unwrap();
    assert_eq!(p.path(), "ann@example.com/dir/file");
    assert_eq!(p.nelem(), 2);
    assert_eq!(p.elem(0), "dir");
    assert_eq!(p.elem(1), "file");
}

#[test]
fn test_parse_lowercases_domain_only() {
    let p = parse("Ann@EXAMPLE.COM/Dir").unwrap();
    assert_eq!(p.user().as_str(), "Ann@example.com");
    assert_eq!(p.path(), "Ann@example.com/Dir");
}

#[test]
fn test_parse_round_trip() {
    for raw in [
        "ann@example.com/",
        "ann@example.com/a",
        "ann@example.com//a//b/c/",
        "ann@example.com/dir/Access",
        "ann@example.com/Group/friends",
    ] {
        let p = parse(raw).unwrap();
        let again = parse(p.path()).unwrap();
        assert_eq!(p, again, "round trip failed for {raw}");
    }
}

#[test]
fn test_parse_rejects_bad_names() {
    for raw in [
        "",
        "ann",
        "@example.com/x",
        "ann@/x",
        "ann@example/x",
        "ann@.example.com/x",
        "ann@example.com./x",
        "a@b@example.com/x",
        "ann@example.com/./x",
        "ann@example.com/../x",
    ] {
        let err = parse(raw).unwrap_err();
        assert_eq!(err.kind, Kind::Invalid, "expected Invalid for {raw:?}");
    }
}

#[test]
fn test_parse_rejects_reserved_all() {
    assert!(UserName::parse("all@example.com").is_err());
    assert!(UserName::parse("ALL@example.com").is_err());
    assert!(UserName::parse("All@other.org").is_err());

    let all = UserName::parse("all@upspin.io").unwrap();
    assert!(all.is_all_users());
}

#[test]
fn test_reserved_name_placement() {
    assert!(parse("ann@example.com/dir/Access").is_ok());
    assert!(parse("ann@example.com/Access/below").is_err());
    assert!(parse("ann@example.com/Group/friends").is_ok());
    assert!(parse("ann@example.com/dir/Group/friends").is_err());
}

#[test]
fn test_first_and_drop() {
    let p = parse("ann@example.com/a/b/c/d").unwrap();

    assert_eq!(p.first(2).path(), "ann@example.com/a/b");
    assert_eq!(p.drop_elems(1).path(), "ann@example.com/a/b/c");
    assert_eq!(p.drop_elems(4).path(), "ann@example.com/");
    assert_eq!(p.drop_elems(10), p.first(0));
    assert_eq!(p.first(3).drop_elems(2), p.first(1));
    assert_eq!(p.first(10), p);
}

#[test]
fn test_parent_of_root_is_root() {
    let root = parse("ann@example.com/").unwrap();
    assert_eq!(root.parent(), root);
}

#[test]
fn test_file_path_and_child() {
    let p = parse("ann@example.com/a/b").unwrap();
    assert_eq!(p.file_path(), "a/b");
    assert_eq!(p.child("c").path(), "ann@example.com/a/b/c");
}

#[test]
fn test_access_and_group_classification() {
    assert!(parse("ann@example.com/dir/Access").unwrap().is_access_file());
    assert!(!parse("ann@example.com/dir/file").unwrap().is_access_file());
    assert!(parse("ann@example.com/Group/friends").unwrap().is_group_file());
    assert!(!parse("ann@example.com/Group").unwrap().is_group_file());
}

#[test]
fn test_has_prefix() {
    let dir = parse("ann@example.com/a").unwrap();
    let file = parse("ann@example.com/a/b").unwrap();
    let other = parse("bob@example.com/a/b").unwrap();

    assert!(file.has_prefix(&dir));
    assert!(file.has_prefix(&file));
    assert!(!dir.has_prefix(&file));
    assert!(!other.has_prefix(&dir));
}

#[test]
fn test_compare_orders_by_canonical_string() {
    let a = parse("ann@example.com/a").unwrap();
    let b = parse("ann@example.com/b").unwrap();
    assert_eq!(a.compare(&b), std::cmp::Ordering::Less);
    assert_eq!(a.compare(&a), std::cmp::Ordering::Equal);
}
