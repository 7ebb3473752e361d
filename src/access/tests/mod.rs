use std::collections::HashMap;

use async_trait::async_trait;

use super::group::{GroupCache, GroupLoader};
use super::*;
use crate::errors::{Error, Kind, Result};
use crate::path::{parse, UserName};

struct MapLoader(HashMap<String, Vec<u8>>);

impl MapLoader {
    fn empty() -> Self {
        Self(HashMap::new())
    }

    fn with(groups: &[(&str, &str)]) -> Self {
        Self(
            groups
                .iter()
                .map(|(path, text)| (path.to_string(), text.as_bytes().to_vec()))
                .collect(),
        )
    }
}

#[async_trait]
impl GroupLoader for MapLoader {
    async fn load(&self, group: &Parsed) -> Result<Vec<u8>> {
        self.0
            .get(group.path())
            .cloned()
            .ok_or_else(|| Error::new("test.load", Kind::NotExist).path(group.path()))
    }
}

fn access(path: &str, text: &str) -> Access {
    Access::parse(parse(path).unwrap(), text.as_bytes()).unwrap()
}

fn user(name: &str) -> UserName {
    UserName::parse(name).unwrap()
}

#[test]
fn test_parse_rights_and_lists() {
    let a = access(
        "me@here.com/Access",
        "r : foo@bob.com, a@b.co, x@y.uk\n\
         w: writer@a.bc\n\
         l: lister@n.mn\n\
         Read : reader@reader.org\n\
         WRITE: anotherwriter@a.bc\n\
         create,DeLeTe : admin@c.com\n",
    );

    assert_eq!(
        a.list(Right::Read),
        vec!["a@b.co", "foo@bob.com", "reader@reader.org", "x@y.uk"]
    );
    assert_eq!(a.list(Right::Write), vec!["anotherwriter@a.bc", "writer@a.bc"]);
    assert_eq!(a.list(Right::List), vec!["lister@n.mn"]);
    assert_eq!(a.list(Right::Create), vec!["admin@c.com"]);
    assert_eq!(a.list(Right::Delete), vec!["admin@c.com"]);
    assert!(!a.is_readable_by_all());
}

#[test]
fn test_parse_comments_blanks_and_star() {
    let a = access(
        "me@here.com/Access",
        "# header comment\n\
         \n\
         * : boss@corp.example # every right\n",
    );
    for right in Right::ALL {
        assert_eq!(a.list(right), vec!["boss@corp.example"]);
    }
}

#[test]
fn test_parse_rejects_malformed_rules() {
    for text in [
        "read\n",                      // no colon
        ": a@b.co\n",                  // blank rights
        "read :\n",                    // blank users
        "fly: a@b.co\n",               // unknown right
        "read: all, other@b.co\n",     // all must be alone
        "read: all@evil.com\n",        // reserved local part
        "read: me@here.com/notgroup\n" // path that is not a group
    ] {
        let err = Access::parse(parse("me@here.com/Access").unwrap(), text.as_bytes()).unwrap_err();
        assert_eq!(err.kind, Kind::Invalid, "expected Invalid for {text:?}");
    }
}

#[test]
fn test_all_users_rule() {
    let a = access("me@here.com/Access", "r: All\nw: writer@foo.bar\n");
    assert!(a.is_readable_by_all());
    assert_eq!(a.list(Right::Read), vec!["all"]);
}

#[tokio::test]
async fn test_all_users_grants_read_only() {
    let a = access("me@here.com/Access", "r: All\nw: writer@foo.bar\n");
    let groups = GroupCache::new();
    let loader = MapLoader::empty();
    let anyone = user("anyone@anywhere.org");
    let file = parse("me@here.com/file").unwrap();

    assert!(a.can(&anyone, Right::Read, &file, &groups, &loader).await.unwrap());
    assert!(!a.can(&anyone, Right::Write, &file, &groups, &loader).await.unwrap());
}

#[test]
fn test_marshal_round_trip() {
    let a = access(
        "me@here.com/Access",
        "create,DeLeTe : admin@c.com\n\
         r : x@y.uk, a@b.co, *@wild.org, friends\n\
         w: writer@a.bc\n",
    );
    let text = a.marshal();
    let again = Access::parse(a.parsed().clone(), text.as_bytes()).unwrap();
    assert_eq!(a, again);
    assert_eq!(text, again.marshal());
}

#[test]
fn test_unqualified_group_resolves_against_owner() {
    let a = access("me@here.com/Access", "r: friends\n");
    assert_eq!(a.list(Right::Read), vec!["me@here.com/Group/friends"]);
}

#[tokio::test]
async fn test_owner_always_reads_and_lists() {
    let a = access("me@here.com/Access", "w: other@else.net\n");
    let groups = GroupCache::new();
    let loader = MapLoader::empty();
    let owner = user("me@here.com");
    let deep = parse("me@here.com/a/b/c").unwrap();

    assert!(a.can(&owner, Right::Read, &deep, &groups, &loader).await.unwrap());
    assert!(a.can(&owner, Right::List, &deep, &groups, &loader).await.unwrap());
    assert!(a.can(&owner, Right::Any, &deep, &groups, &loader).await.unwrap());
    // Write was granted away, not to the owner.
    assert!(!a.can(&owner, Right::Write, &deep, &groups, &loader).await.unwrap());
    // But the owner always controls ACL files.
    let acl = parse("me@here.com/a/Access").unwrap();
    assert!(a.can(&owner, Right::Write, &acl, &groups, &loader).await.unwrap());
}

#[tokio::test]
async fn test_default_access_grants_owner_everything() {
    let a = Access::default_for(user("me@here.com"));
    let groups = GroupCache::new();
    let loader = MapLoader::empty();
    let file = parse("me@here.com/file").unwrap();

    for right in Right::ALL {
        assert!(a.can(&user("me@here.com"), right, &file, &groups, &loader).await.unwrap());
        assert!(!a.can(&user("other@else.net"), right, &file, &groups, &loader).await.unwrap());
    }
}

#[tokio::test]
async fn test_wildcard_domain_matches_case_insensitively() {
    let a = access("me@here.com/Access", "r: *@Corp.Example\n");
    let groups = GroupCache::new();
    let loader = MapLoader::empty();
    let file = parse("me@here.com/file").unwrap();

    assert!(a
        .can(&user("dev@CORP.example"), Right::Read, &file, &groups, &loader)
        .await
        .unwrap());
    assert!(!a
        .can(&user("dev@other.example"), Right::Read, &file, &groups, &loader)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_group_membership_grants_right() {
    let a = access("me@here.com/Access", "r: friends\n");
    let groups = GroupCache::new();
    let loader = MapLoader::with(&[(
        "me@here.com/Group/friends",
        "pal@one.org, buddy@two.org",
    )]);
    let file = parse("me@here.com/file").unwrap();

    assert!(a.can(&user("pal@one.org"), Right::Read, &file, &groups, &loader).await.unwrap());
    assert!(!a.can(&user("nobody@x.org"), Right::Read, &file, &groups, &loader).await.unwrap());
}

#[tokio::test]
async fn test_group_cycle_terminates() {
    let a = access("me@here.com/Access", "r: one\n");
    let groups = GroupCache::new();
    let loader = MapLoader::with(&[
        ("me@here.com/Group/one", "a@a.aa\ntwo"),
        ("me@here.com/Group/two", "b@b.bb\nthree"),
        ("me@here.com/Group/three", "c@c.cc\none"),
    ]);
    let file = parse("me@here.com/file").unwrap();

    assert!(a.can(&user("a@a.aa"), Right::Read, &file, &groups, &loader).await.unwrap());
    assert!(a.can(&user("c@c.cc"), Right::Read, &file, &groups, &loader).await.unwrap());
    assert!(!a.can(&user("z@z.zz"), Right::Read, &file, &groups, &loader).await.unwrap());

    let (users, missing) = a.users(Right::Read, &groups, &loader).await.unwrap();
    assert_eq!(users, vec!["a@a.aa", "b@b.bb", "c@c.cc", "me@here.com"]);
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_missing_group_only_denies_its_own_grants() {
    let a = access("me@here.com/Access", "r: ghosts, pal@one.org\n");
    let groups = GroupCache::new();
    let loader = MapLoader::empty();
    let file = parse("me@here.com/file").unwrap();

    assert!(a.can(&user("pal@one.org"), Right::Read, &file, &groups, &loader).await.unwrap());
    assert!(!a.can(&user("ghost@x.org"), Right::Read, &file, &groups, &loader).await.unwrap());

    let (users, missing) = a.users(Right::Read, &groups, &loader).await.unwrap();
    assert_eq!(users, vec!["me@here.com", "pal@one.org"]);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].path(), "me@here.com/Group/ghosts");
}

#[tokio::test]
async fn test_users_any_right_unions_all_rights() {
    let a = access("me@here.com/Access", "r: a@b.co\nw: c@d.ef\nd: a@b.co\n");
    let groups = GroupCache::new();
    let loader = MapLoader::empty();

    let (users, _) = a.users(Right::Any, &groups, &loader).await.unwrap();
    assert_eq!(users, vec!["a@b.co", "c@d.ef", "me@here.com"]);
}

#[test]
fn test_group_rejects_all_everywhere() {
    for text in ["all", "All", "ALL", "all@upspin.io", "a@b.co all", "a@b.co, All@UPSPIN.IO"] {
        let err =
            super::group::Group::parse(parse("me@here.com/Group/g").unwrap(), text.as_bytes())
                .unwrap_err();
        assert_eq!(err.kind, Kind::Invalid, "expected Invalid for {text:?}");
    }
}

#[test]
fn test_group_parses_members() {
    let g = super::group::Group::parse(
        parse("me@here.com/Group/g").unwrap(),
        b"# pals\npal@one.org, buddy@two.org other # trailing comment\n",
    )
    .unwrap();
    let members: Vec<String> = g.members().iter().map(|m| m.to_string()).collect();
    assert_eq!(members, vec!["buddy@two.org", "me@here.com/Group/other", "pal@one.org"]);
}

#[test]
fn test_group_cache_eviction_by_path() {
    let cache = GroupCache::new();
    let g = super::group::Group::parse(parse("me@here.com/Group/g").unwrap(), b"pal@one.org")
        .unwrap();
    let path = g.parsed().clone();
    cache.insert(g);
    assert!(cache.get(&path).is_some());
    cache.remove(&path);
    assert!(cache.get(&path).is_none());
}
