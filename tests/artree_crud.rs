use artree::Art;

#[test]
fn simple_crud() {
    let art: Art<&str> = Art::new();

    art.put(b"hello", "world");
    assert_eq!(art.get(b"hello"), Some("world"));

    art.delete(b"hello false");
    assert_eq!(art.get(b"hello"), Some("world"));

    art.delete(b"hello");
    assert_eq!(art.get(b"hello"), None);
}

#[test]
fn keys_prefixing_each_other() {
    let keys: Vec<Vec<u8>> = vec![
        vec![1],
        vec![1, 2, 3, 4],
        vec![1, 2],
        vec![1, 2, 3, 4, 5],
        vec![1, 2, 3],
        vec![2, 3, 4],
        vec![2, 3, 5],
        vec![2, 3],
        vec![3, 1],
        vec![3, 2, 3, 7, 5],
        vec![3, 2, 3, 4, 5],
        vec![3, 2],
    ];

    let art: Art<String> = Art::new();
    for key in &keys {
        art.put(key, format!("{key:?}"));
    }
    for key in &keys {
        assert_eq!(art.get(key), Some(format!("{key:?}")), "key {key:?}");
    }
}

#[test]
fn empty_and_missing_keys_alias() {
    let art: Art<&str> = Art::new();

    art.put(b"", "empty");
    assert_eq!(art.get(b""), Some("empty"));

    art.put(&[], "missing");
    assert_eq!(art.get(&[]), Some("missing"));
    assert_eq!(art.get(b""), Some("missing"));
}

#[test]
fn lookups_miss_cleanly() {
    let art: Art<&str> = Art::new();

    assert_eq!(art.get(&[]), None);
    assert_eq!(art.get(&[1, 2, 3]), None);

    art.put(&[1, 2], "1 2");
    assert_eq!(art.get(&[1, 2, 3]), None);

    art.put(&[2, 3, 4, 5], "2 3 4 5");
    assert_eq!(art.get(&[2, 3, 6]), None);
    assert_eq!(art.get(&[2, 3]), None);
}

#[test]
fn leaf_expansion_on_long_shared_prefixes() {
    let cases: Vec<(&[u8], i32)> = vec![
        (b"abcdefghijklmn", 1),
        (b"abcdefghijklmnopq", 2),
        (b"abcdefg", 3),
        (b"abcdefghijklmn123", 4),
        (b"deanthropomorphic", 5),
        (b"deanthropomorphism", 6),
        (b"deanthropomorphization", 7),
        (b"deanthropomorphize", 8),
    ];

    let art: Art<i32> = Art::new();
    for (key, value) in &cases {
        art.put(key, *value);
    }
    for (key, value) in &cases {
        assert_eq!(art.get(key), Some(*value));
    }
}

#[test]
fn overwrite_replaces_value() {
    let art: Art<&str> = Art::new();

    art.put(b"12", "12");
    art.put(b"12", "12 new");
    assert_eq!(art.get(b"12"), Some("12 new"));

    // Same again once the key holds a prefix-leaf position.
    art.put(b"123", "123");
    art.put(b"12", "12 new2");
    assert_eq!(art.get(b"12"), Some("12 new2"));
    assert_eq!(art.get(b"123"), Some("123"));
}

#[test]
fn delete_of_absent_keys_preserves_the_rest() {
    let art: Art<u32> = Art::new();
    let keys: Vec<&[u8]> = vec![b"a", b"ab", b"abc", b"b", b"ba"];
    for (i, key) in keys.iter().enumerate() {
        art.put(key, i as u32);
    }

    art.delete(b"");
    art.delete(b"abcd");
    art.delete(b"aa");
    art.delete(b"zzz");

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(art.get(key), Some(i as u32));
    }
}
