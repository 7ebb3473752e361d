use super::*;

#[test]
fn test_display_full_chain() {
    let cause = Error::new("storage.get", Kind::IO).detail("connection reset");
    let err = Error::new("dir.lookup", Kind::NotExist).path("ann@example.com/f").cause(cause);

    assert_eq!(
        err.to_string(),
        "dir.lookup: ann@example.com/f: item does not exist: \
         storage.get: I/O error: connection reset"
    );
}

#[test]
fn test_is_matches_through_cause_chain() {
    let err = Error::new("dir.put", Kind::IO)
        .cause(Error::new("storage.put", Kind::Transient).detail("backend draining"));

    assert!(err.is(Kind::IO));
    assert!(err.is(Kind::Transient));
    assert!(!err.is(Kind::Permission));
}

#[test]
fn test_io_wraps_kind() {
    let err = Error::io("cache.read", std::io::Error::new(std::io::ErrorKind::Other, "boom"));
    assert_eq!(err.kind, Kind::IO);
    assert_eq!(err.op, "cache.read");
}
