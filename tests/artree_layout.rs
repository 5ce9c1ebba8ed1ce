use artree::debug::NodeKind;
use artree::Art;

// Shrink thresholds of the three larger layouts.
const NODE16_MIN: usize = 4;
const NODE48_MIN: usize = 13;
const NODE256_MIN: usize = 38;

#[test]
fn grows_through_every_layout() {
    let art: Art<usize> = Art::new();

    for i in 0..4 {
        art.put(&[i as u8], i);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node4);

    art.put(&[4], 4);
    assert_eq!(art.debug_root().kind, NodeKind::Node16);

    for i in 5..17 {
        art.put(&[i as u8], i);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node48);

    for i in 17..49 {
        art.put(&[i as u8], i);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node256);

    for i in 0..49 {
        assert_eq!(art.get(&[i as u8]), Some(i));
    }
}

#[test]
fn shrinks_back_through_every_layout() {
    let art: Art<usize> = Art::new();
    for i in 0..256 {
        art.put(&[i as u8], i);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node256);

    for i in 0..=(256 - NODE256_MIN) {
        art.delete(&[i as u8]);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node48);

    for i in (256 - NODE256_MIN + 1)..=(256 - NODE48_MIN) {
        art.delete(&[i as u8]);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node16);

    for i in (256 - NODE48_MIN + 1)..=(256 - NODE16_MIN) {
        art.delete(&[i as u8]);
    }
    assert_eq!(art.debug_root().kind, NodeKind::Node4);

    // The root Node4 is never replaced, not even once empty.
    let addr = art.debug_root().addr;
    for i in (256 - NODE16_MIN + 1)..256 {
        art.delete(&[i as u8]);
    }
    let root = art.debug_root();
    assert_eq!(root.kind, NodeKind::Node4);
    assert_eq!(root.addr, addr);
    assert_eq!(root.num_children, 0);
    assert_eq!(art.min(), None);
}

#[test]
fn compression_inlines_single_children() {
    let art: Art<&str> = Art::new();

    art.put(&[2, 1], "21");
    art.put(&[1, 2], "12");
    art.put(&[1, 2, 5], "125");
    art.put(&[1, 2, 3, 7], "1237");
    art.put(&[1, 2, 3, 4, 5], "12345");
    art.put(&[1, 2, 3, 4, 6], "12346");

    art.delete(&[1, 2, 3, 7]);
    art.delete(&[1, 2, 5]);

    assert_eq!(art.get(&[1, 2, 3, 4, 5]), Some("12345"));
    assert_eq!(art.get(&[1, 2, 3, 4, 6]), Some("12346"));

    art.delete(&[2, 1]);
    assert_eq!(art.get(&[1, 2]), Some("12"));

    art.delete(&[1, 2, 3, 4, 5]);
    assert_eq!(art.get(&[1, 2, 3, 4, 6]), Some("12346"));

    art.delete(&[1, 2]);
    assert_eq!(art.get(&[1, 2]), None);

    // Everything left is the single leaf hanging off the root under its
    // fully compressed path.
    let root = art.debug_root();
    assert_eq!(root.kind, NodeKind::Node4);
    assert_eq!(root.num_children, 1);
    let expected = (vec![1, 2, 3, 4, 6], "12346");
    assert_eq!(art.min(), Some(expected.clone()));
    assert_eq!(art.max(), Some(expected));
}

#[test]
fn grows_interior_nodes_two_levels_deep() {
    let art: Art<String> = Art::new();
    let mut keys: Vec<Vec<u8>> = Vec::new();
    for i in 0..256 {
        keys.push(vec![i as u8]);
    }
    for i in 0..256 {
        for j in 0..256 {
            keys.push(vec![i as u8, j as u8]);
        }
    }

    for key in &keys {
        art.put(key, format!("{key:?}"));
    }
    for key in &keys {
        assert_eq!(art.get(key), Some(format!("{key:?}")), "key {key:?}");
    }
}

#[test]
fn long_prefixes_survive_splits() {
    // Shared prefixes far beyond the 8 inline bytes force full-key recovery
    // during splits and later lookups.
    let art: Art<u32> = Art::new();
    let long = b"absdwqbsbdbfb".repeat(4);

    let mut keys: Vec<Vec<u8>> = Vec::new();
    for i in 0..8u8 {
        let mut key = long.clone();
        key.push(i);
        key.extend_from_slice(b"tail");
        keys.push(key);
    }
    // A key that diverges in the middle of the long compressed path.
    let mut divergent = long[..20].to_vec();
    divergent.push(0xEE);
    keys.push(divergent);

    for (i, key) in keys.iter().enumerate() {
        art.put(key, i as u32);
    }
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(art.get(key), Some(i as u32));
    }
}
