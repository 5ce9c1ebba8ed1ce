use std::thread;

use artree::Art;

fn workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 8)
}

fn random_keys(seed: u64, count: usize) -> Vec<Vec<u8>> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut set = std::collections::BTreeSet::new();
    while set.len() < count {
        let len = rng.usize(1..14);
        let key: Vec<u8> = (0..len).map(|_| rng.u8(b'a'..=b'z')).collect();
        set.insert(key);
    }
    let mut keys: Vec<Vec<u8>> = set.into_iter().collect();
    rng.shuffle(&mut keys);
    keys
}

#[test]
fn concurrent_inserts_land() {
    let keys = random_keys(1, 8000);
    let threads = workers();
    let per_thread = keys.len() / threads;

    for _ in 0..3 {
        let art: Art<Vec<u8>> = Art::new();
        thread::scope(|s| {
            for chunk in keys.chunks(per_thread) {
                let art = &art;
                s.spawn(move || {
                    for key in chunk {
                        art.put(key, key.clone());
                    }
                });
            }
        });

        for key in &keys {
            assert_eq!(art.get(key), Some(key.clone()), "key {key:?}");
        }
    }
}

#[test]
fn concurrent_deletes_remove_exactly_their_keys() {
    let keys = random_keys(2, 8000);
    let victims = &keys[..keys.len() / 5 * 4];
    let threads = workers();
    let per_thread = victims.len() / threads;

    for _ in 0..3 {
        let art: Art<Vec<u8>> = Art::new();
        for key in &keys {
            art.put(key, key.clone());
        }

        thread::scope(|s| {
            for chunk in victims.chunks(per_thread) {
                let art = &art;
                s.spawn(move || {
                    for key in chunk {
                        art.delete(key);
                    }
                });
            }
        });

        for (i, key) in keys.iter().enumerate() {
            if i < victims.len() {
                assert_eq!(art.get(key), None, "deleted key {key:?}");
            } else {
                assert_eq!(art.get(key), Some(key.clone()), "kept key {key:?}");
            }
        }
    }
}

#[test]
fn inserts_are_visible_to_their_writer() {
    let keys = random_keys(3, 8000);
    let threads = workers();
    let per_thread = keys.len() / threads;

    for _ in 0..3 {
        let art: Art<Vec<u8>> = Art::new();
        thread::scope(|s| {
            for chunk in keys.chunks(per_thread) {
                let art = &art;
                s.spawn(move || {
                    for key in chunk {
                        art.put(key, key.clone());
                        assert_eq!(art.get(key), Some(key.clone()));
                    }
                });
            }
        });
    }
}

#[test]
fn scan_survives_concurrent_inserts() {
    let keys = random_keys(4, 12000);
    let pivot = keys.len() / 2;
    let (stable, incoming) = keys.split_at(pivot);

    let art: Art<Vec<u8>> = Art::new();
    for key in stable {
        art.put(key, key.clone());
    }
    let mut stable_sorted: Vec<Vec<u8>> = stable.to_vec();
    stable_sorted.sort();

    let threads = workers();
    let per_thread = incoming.len() / threads;
    let mut observed = Vec::new();

    thread::scope(|s| {
        for chunk in incoming.chunks(per_thread) {
            let art = &art;
            s.spawn(move || {
                for key in chunk {
                    art.put(key, key.clone());
                }
            });
        }

        // Scan the whole key space while the writers run. The upper bound
        // sorts past every possible key, so the scan ends by exhausting the
        // tree.
        art.range(b"", &[0xff; 16], true, true, |k, _| {
            observed.push(k.to_vec());
            false
        });
    });

    // Strictly ascending, never a duplicate, despite internal restarts.
    assert!(observed.windows(2).all(|w| w[0] < w[1]));

    // Every key observed was inserted at some point.
    let universe: std::collections::BTreeSet<&[u8]> =
        keys.iter().map(|k| k.as_slice()).collect();
    for key in &observed {
        assert!(universe.contains(key.as_slice()), "phantom key {key:?}");
    }

    // Keys present before the scan started must all be observed, in order.
    let stable_set: std::collections::BTreeSet<&[u8]> =
        stable.iter().map(|k| k.as_slice()).collect();
    let seen_stable: Vec<Vec<u8>> = observed
        .iter()
        .filter(|k| stable_set.contains(k.as_slice()))
        .cloned()
        .collect();
    assert_eq!(seen_stable, stable_sorted);
}

#[test]
fn mixed_insert_and_delete_churn() {
    let keys = random_keys(5, 6000);
    let (inserted, churn) = keys.split_at(keys.len() / 2);

    let art: Art<Vec<u8>> = Art::new();
    for key in inserted {
        art.put(key, key.clone());
    }

    thread::scope(|s| {
        let art = &art;
        s.spawn(move || {
            for key in churn {
                art.put(key, key.clone());
            }
            for key in churn {
                art.delete(key);
            }
        });
        s.spawn(move || {
            for key in inserted {
                assert_eq!(art.get(key), Some(key.clone()));
            }
        });
    });

    for key in inserted {
        assert_eq!(art.get(key), Some(key.clone()));
    }
    for key in churn {
        assert_eq!(art.get(key), None);
    }
}
