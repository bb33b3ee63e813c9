// Copyright 2022-2026 Triedb Developers.
// This file is part of Triedb.

// Triedb is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Triedb is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Triedb.  If not, see <http://www.gnu.org/licenses/>.

//! End-to-end database scenarios over real (anonymous or file-backed)
//! pools.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use triedb::{
    auto_expire, make_erase, make_prefix_update, make_update, Db, DbConfig, DbError, Node,
    ReadOnlyDb, ReadOnlyDbConfig, StateMachineAlwaysEmpty, StateMachineAlwaysMerkle,
    TraverseMachine, UpsertFlags,
};

const KV: &[(&[u8], &[u8])] = &[
    (
        b"\x12\x34\x56\x78\x12\x34\x56\x78\x12\x34\x56\x78\x12\x34\x56\x78",
        b"\xde\xad\xbe\xef\xde\xad\xbe\xef",
    ),
    (
        b"\x12\x34\x56\x78\x22\x34\x56\x78\x12\x34\x56\x78\x12\x34\x56\x78",
        b"\xde\xad\xbe\xef\xca\xfe\xba\xbe",
    ),
    (
        b"\x12\x34\x56\x78\x32\x34\x56\x78\x12\x34\x56\x78\x12\x34\x56\x71",
        b"\xde\xad\xca\xfe\xde\xad\xca\xfe",
    ),
    (
        b"\x12\x34\x56\x78\x32\x34\x56\x78\x12\x34\x56\x78\x12\x34\x56\x78",
        b"\xde\xad\xba\xbe\xde\xad\xba\xbe",
    ),
];

fn small_config() -> DbConfig {
    DbConfig {
        chunk_capacity_log2: 16,
        anonymous_chunks: 24,
        node_cache_mem: 1024 * 1024,
        ..DbConfig::default()
    }
}

fn merkle_db(config: DbConfig) -> Db {
    Db::open(Box::new(StateMachineAlwaysMerkle::default()), config).unwrap()
}

fn create_db_file(dir: &tempfile::TempDir, chunks: u64, capacity_log2: u8) -> PathBuf {
    let path = dir.path().join("test.db");
    let file = std::fs::File::create(&path).unwrap();
    // Generously sized: the metadata region plus the chunks.
    file.set_len(4 * 1024 * 1024 + chunks * (1 << capacity_log2)).unwrap();
    path
}

fn be_key(n: u64) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

#[test]
fn two_key_merkle_and_data_digest() {
    let mut db = merkle_db(small_config());
    let prefix: &[u8] = b"\x00";
    db.upsert(
        vec![make_prefix_update(
            prefix,
            vec![
                make_update(KV[0].0, KV[0].1),
                make_update(KV[1].0, KV[1].1),
            ],
        )],
        1,
    )
    .unwrap();

    let key0: Vec<u8> = [prefix, KV[0].0].concat();
    let key1: Vec<u8> = [prefix, KV[1].0].concat();
    assert_eq!(db.get(&key0, 1).unwrap(), KV[0].1);
    assert_eq!(db.get(&key1, 1).unwrap(), KV[1].1);
    let digest = db.get_data(prefix, 1).unwrap();
    assert!(!digest.is_empty());

    // The same map built in the opposite order, as a different version, in
    // a different database, digests identically.
    let mut other = merkle_db(small_config());
    other
        .upsert(
            vec![make_prefix_update(
                prefix,
                vec![
                    make_update(KV[1].0, KV[1].1),
                    make_update(KV[0].0, KV[0].1),
                ],
            )],
            7,
        )
        .unwrap();
    assert_eq!(other.get_data(prefix, 7).unwrap(), digest);
    assert_eq!(other.root_hash(), db.root_hash());

    // Growing the map changes the digest.
    db.upsert(
        vec![make_prefix_update(prefix, vec![make_update(KV[2].0, KV[2].1)])],
        2,
    )
    .unwrap();
    assert_ne!(db.get_data(prefix, 2).unwrap(), digest);
    // The old version still digests as before.
    assert_eq!(db.get_data(prefix, 1).unwrap(), digest);
}

#[test]
fn erase_collapses_to_single_leaf() {
    let mut db = merkle_db(small_config());
    db.upsert(
        vec![
            make_update(b"\x12\x34\x56\x78", b"\xde\xad\xbe\xef"),
            make_update(b"\x12\x34\x66\x78", b"\xca\xfe\xba\xbe"),
        ],
        1,
    )
    .unwrap();
    db.upsert(vec![make_erase(b"\x12\x34\x66\x78")], 2).unwrap();

    let root = db.root().unwrap();
    assert!(root.is_leaf());
    assert_eq!(root.path.len(), 8);
    assert_eq!(root.value.as_deref(), Some(&b"\xde\xad\xbe\xef"[..]));
    assert_eq!(db.get(b"\x12\x34\x56\x78", 2).unwrap(), b"\xde\xad\xbe\xef");
    // Version 1 still has both keys.
    assert_eq!(db.get(b"\x12\x34\x66\x78", 1).unwrap(), b"\xca\xfe\xba\xbe");
}

#[test]
fn history_eviction_after_window_fills() {
    let mut config = DbConfig {
        fixed_history_length: Some(1000),
        chunk_capacity_log2: 18,
        anonymous_chunks: 40,
        ..small_config()
    };
    config.compaction = true;
    let mut db = merkle_db(config);
    let key = b"\x42\x42\x42\x42";
    for version in 0..=999u64 {
        db.upsert(vec![make_update(key, &be_key(version))], version)
            .unwrap();
    }
    assert_eq!(db.get(key, 0).unwrap(), be_key(0));
    assert_eq!(db.get_earliest_version(), Some(0));

    db.upsert(vec![make_update(key, &be_key(1000))], 1000).unwrap();
    assert!(matches!(
        db.get(key, 0),
        Err(DbError::VersionNoLongerExists)
    ));
    assert_eq!(db.get(key, 1000).unwrap(), be_key(1000));
    assert_eq!(db.get_earliest_version(), Some(1));
    assert_eq!(db.get_latest_version(), Some(1000));
}

#[test]
fn out_of_order_upserts_around_a_version_move() {
    let mut db = merkle_db(DbConfig {
        fixed_history_length: Some(40),
        ..small_config()
    });
    db.upsert(vec![make_update(b"\x01", b"zero")], 0).unwrap();
    db.move_trie_version_forward(0, 50).unwrap();
    assert_eq!(db.get_latest_version(), Some(50));
    assert_eq!(db.get_earliest_version(), Some(50));
    assert!(matches!(
        db.get(b"\x01", 0),
        Err(DbError::VersionNoLongerExists)
    ));
    assert_eq!(db.get(b"\x01", 50).unwrap(), b"zero");

    // Fill earlier versions backwards.
    for version in (48..50u64).rev() {
        db.upsert(vec![make_update(b"\x02", b"back")], version)
            .unwrap();
        assert_eq!(db.get_earliest_version(), Some(version));
        assert_eq!(db.get_latest_version(), Some(50));
    }
    assert_eq!(db.get(b"\x02", 48).unwrap(), b"back");

    // And continue forward on top of the moved version.
    db.load_root_for_version(50).unwrap();
    for version in 51..=55u64 {
        db.upsert(vec![make_update(b"\x03", b"fwd")], version).unwrap();
    }
    assert_eq!(db.get(b"\x01", 55).unwrap(), b"zero");
    assert_eq!(db.get(b"\x03", 55).unwrap(), b"fwd");
    assert_eq!(db.get_latest_version(), Some(55));
}

#[test]
fn move_version_forward_within_window_keeps_older_versions() {
    let mut db = merkle_db(DbConfig {
        fixed_history_length: Some(20),
        ..small_config()
    });
    for version in 0..=5u64 {
        db.upsert(vec![make_update(b"\x0a", &be_key(version))], version)
            .unwrap();
    }
    db.move_trie_version_forward(5, 15).unwrap();
    // 0..=4 stay valid, 5 was retired, 15 took its place.
    assert_eq!(db.get_earliest_version(), Some(0));
    assert_eq!(db.get_latest_version(), Some(15));
    assert_eq!(db.get(b"\x0a", 3).unwrap(), be_key(3));
    assert!(matches!(
        db.get(b"\x0a", 5),
        Err(DbError::VersionNoLongerExists)
    ));
    assert_eq!(db.get(b"\x0a", 15).unwrap(), be_key(5));
    // Versions in the hole probe as gone.
    assert!(matches!(
        db.get(b"\x0a", 9),
        Err(DbError::VersionNoLongerExists)
    ));
}

#[test]
fn copy_trie_same_version_duplicates_digest() {
    let mut db = merkle_db(small_config());
    let src: &[u8] = b"\x00";
    let dst: &[u8] = b"\x01";
    let long_dst: &[u8] = b"\x10\x10";
    let mut subtree = Vec::new();
    for (k, v) in KV {
        subtree.push(make_update(k, v));
    }
    db.upsert(vec![make_prefix_update(src, subtree)], 0).unwrap();
    let src_digest = db.get_data(src, 0).unwrap();

    db.copy_trie(0, src, 0, dst).unwrap();
    db.copy_trie(0, src, 0, long_dst).unwrap();

    for prefix in [src, dst, long_dst] {
        assert_eq!(db.get_data(prefix, 0).unwrap(), src_digest);
        for (k, v) in KV {
            let key: Vec<u8> = [prefix, *k].concat();
            assert_eq!(db.get(&key, 0).unwrap(), *v, "prefix {:x?}", prefix);
        }
    }
}

#[test]
fn copy_trie_to_new_version_layers_changes() {
    let mut db = merkle_db(small_config());
    let src: &[u8] = b"\x00\x12";
    let dst: &[u8] = b"\x00\x13";
    db.upsert(
        vec![make_prefix_update(src, vec![make_update(b"\xaa", b"one")])],
        0,
    )
    .unwrap();

    db.copy_trie(0, src, 1, dst).unwrap();
    // The writer sees the copy in memory, but the destination version is
    // not committed until an upsert at that version.
    assert!(!db.version_is_valid(1));
    db.upsert(Vec::new(), 1).unwrap();
    assert!(db.version_is_valid(1));

    let src_key: Vec<u8> = [src, &b"\xaa"[..]].concat();
    let dst_key: Vec<u8> = [dst, &b"\xaa"[..]].concat();
    assert_eq!(db.get(&src_key, 1).unwrap(), b"one");
    assert_eq!(db.get(&dst_key, 1).unwrap(), b"one");
    assert_eq!(db.get_data(src, 1).unwrap(), db.get_data(dst, 1).unwrap());

    // Modify the copy; the original is untouched.
    db.upsert(
        vec![make_prefix_update(dst, vec![make_update(b"\xbb", b"two")])],
        1,
    )
    .unwrap();
    assert_eq!(db.get(&[dst, &b"\xbb"[..]].concat(), 1).unwrap(), b"two");
    assert!(db.get(&[src, &b"\xbb"[..]].concat(), 1).is_err());
    // Version 0 never saw the copy.
    assert!(db.get(&dst_key, 0).is_err());
}

#[test]
fn reopen_append_restores_latest_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let config = DbConfig {
        dbname_paths: vec![path],
        ..small_config()
    };
    {
        let db = merkle_db(config.clone());
        // Fresh database: nothing committed.
        assert_eq!(db.get_latest_version(), None);
        assert!(db.root().is_none());
    }
    {
        let mut db = merkle_db(DbConfig {
            append: true,
            ..config.clone()
        });
        assert_eq!(db.get_latest_version(), None);
        db.upsert(vec![make_update(KV[2].0, KV[2].1)], 0x123).unwrap();
    }
    let db = merkle_db(DbConfig {
        append: true,
        ..config
    });
    assert!(db.root().is_some());
    assert_eq!(db.get_latest_version(), Some(0x123));
    assert_eq!(db.get_earliest_version(), Some(0x123));
    assert_eq!(db.get(KV[2].0, 0x123).unwrap(), KV[2].1);
}

#[test]
fn reopen_with_shorter_history_drops_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let config = DbConfig {
        dbname_paths: vec![path],
        fixed_history_length: Some(10),
        ..small_config()
    };
    {
        let mut db = merkle_db(config.clone());
        for version in 0..10u64 {
            db.upsert(vec![make_update(b"\x05", &be_key(version))], version)
                .unwrap();
        }
        assert_eq!(db.get_earliest_version(), Some(0));
    }
    // Shrink on reopen: the oldest versions fall out immediately.
    let db = merkle_db(DbConfig {
        append: true,
        fixed_history_length: Some(4),
        ..config.clone()
    });
    assert_eq!(db.get_history_length(), 4);
    assert_eq!(db.get_latest_version(), Some(9));
    assert_eq!(db.get_earliest_version(), Some(6));
    assert!(matches!(
        db.get(b"\x05", 5),
        Err(DbError::VersionNoLongerExists)
    ));
    assert_eq!(db.get(b"\x05", 6).unwrap(), be_key(6));
    drop(db);

    // Growing back does not resurrect what was invalidated.
    let db = merkle_db(DbConfig {
        append: true,
        fixed_history_length: Some(10),
        ..config
    });
    assert_eq!(db.get_history_length(), 10);
    assert_eq!(db.get_earliest_version(), Some(6));
    assert!(matches!(
        db.get(b"\x05", 5),
        Err(DbError::VersionNoLongerExists)
    ));
}

#[test]
fn read_only_follower_tracks_live_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let mut db = merkle_db(DbConfig {
        dbname_paths: vec![path.clone()],
        ..small_config()
    });
    db.upsert(vec![make_update(KV[0].0, KV[0].1)], 0).unwrap();

    let ro = ReadOnlyDb::open(ReadOnlyDbConfig {
        dbname_paths: vec![path],
        ..ReadOnlyDbConfig::default()
    })
    .unwrap();
    assert_eq!(ro.get_latest_version().unwrap(), Some(0));
    assert_eq!(ro.get(KV[0].0, 0).unwrap(), KV[0].1);

    let mut seen = 0u64;
    for version in 1..=5u64 {
        db.upsert(vec![make_update(KV[1].0, &be_key(version))], version)
            .unwrap();
        let latest = ro.get_latest_version().unwrap().unwrap();
        assert!(latest >= seen, "latest version went backwards");
        seen = latest;
        assert_eq!(ro.get(KV[1].0, version).unwrap(), be_key(version));
        // The writer's older roots stay visible inside the window.
        assert_eq!(ro.get(KV[0].0, version).unwrap(), KV[0].1);
    }
    assert_eq!(seen, 5);
    assert_eq!(
        ro.get_data(KV[0].0, 5).unwrap(),
        db.get_data(KV[0].0, 5).unwrap()
    );
}

#[test]
fn uncommitted_root_is_invisible_to_followers() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let mut db = merkle_db(DbConfig {
        dbname_paths: vec![path.clone()],
        ..small_config()
    });
    let ro = ReadOnlyDb::open(ReadOnlyDbConfig {
        dbname_paths: vec![path],
        ..ReadOnlyDbConfig::default()
    })
    .unwrap();

    db.upsert_opt(
        vec![make_update(b"\x11", b"hidden")],
        0,
        UpsertFlags {
            compaction: false,
            write_root: false,
        },
    )
    .unwrap();
    // The writer sees its own uncommitted state; the follower does not.
    assert_eq!(db.get(b"\x11", 0).unwrap(), b"hidden");
    assert!(ro.get(b"\x11", 0).is_err());

    db.upsert(vec![make_update(b"\x22", b"visible")], 0).unwrap();
    assert_eq!(ro.get(b"\x11", 0).unwrap(), b"hidden");
    assert_eq!(ro.get(b"\x22", 0).unwrap(), b"visible");
}

#[test]
fn burst_of_identical_lookups_issues_one_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let mut db = merkle_db(DbConfig {
        dbname_paths: vec![path.clone()],
        ..small_config()
    });
    let mut updates = Vec::new();
    for i in 0..64u64 {
        updates.push(make_update(&be_key(i), &be_key(i)));
    }
    db.upsert(updates, 0).unwrap();

    // One cold handle serves a single lookup, another a burst of eight
    // identical lookups issued before any completion is polled. With
    // single-flight reads the burst costs exactly as many pool reads as
    // the single lookup.
    let single_reads = {
        let ro = ReadOnlyDb::open(ReadOnlyDbConfig {
            dbname_paths: vec![path.clone()],
            ..ReadOnlyDbConfig::default()
        })
        .unwrap();
        let before = ro.reactor().storage_pool().read_count();
        assert_eq!(ro.get(&be_key(17), 0).unwrap(), be_key(17));
        ro.reactor().storage_pool().read_count() - before
    };
    assert!(single_reads > 0);

    let ro = ReadOnlyDb::open(ReadOnlyDbConfig {
        dbname_paths: vec![path],
        ..ReadOnlyDbConfig::default()
    })
    .unwrap();
    let before = ro.reactor().storage_pool().read_count();
    let key = be_key(17);
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let hits = hits.clone();
        let expected = key.clone();
        ro.get_async(
            &key,
            0,
            Box::new(move |result| {
                assert_eq!(result.unwrap(), expected);
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    while hits.load(Ordering::SeqCst) < 8 {
        ro.poll(true);
    }
    let burst_reads = ro.reactor().storage_pool().read_count() - before;
    assert_eq!(burst_reads, single_reads);
}

#[test]
fn compaction_keeps_a_bounded_pool_alive() {
    // Eight 16 KiB chunks come to 32 disk pages. Forty versions of
    // rewrites append ~120 pages, so finishing at all means dead chunks
    // kept returning to the free list.
    let mut db = merkle_db(DbConfig {
        chunk_capacity_log2: 14,
        anonymous_chunks: 8,
        fixed_history_length: Some(2),
        compaction: true,
        ..small_config()
    });
    for version in 0..40u64 {
        db.upsert(
            vec![
                make_update(b"\xaa\xaa", &be_key(version)),
                make_update(b"\xbb\xbb", &be_key(version)),
            ],
            version,
        )
        .unwrap();
    }
    assert_eq!(db.get(b"\xaa\xaa", 39).unwrap(), be_key(39));
    assert_eq!(db.get(b"\xbb\xbb", 39).unwrap(), be_key(39));
    assert_eq!(db.get_earliest_version(), Some(38));
}

#[test]
fn rewind_then_replay_reproduces_roots() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let mut db = merkle_db(DbConfig {
        dbname_paths: vec![path],
        ..small_config()
    });
    let update_for = |version: u64| vec![make_update(b"\x31\x41", &be_key(version))];
    let mut hashes = Vec::new();
    for version in 0..6u64 {
        db.upsert(update_for(version), version).unwrap();
        hashes.push(db.root_hash());
    }

    db.rewind_to_version(3).unwrap();
    assert_eq!(db.get_latest_version(), Some(3));
    assert_eq!(db.root_hash(), hashes[3]);
    assert!(matches!(
        db.get(b"\x31\x41", 4),
        Err(DbError::VersionNoLongerExists)
    ));

    // Replaying the same updates reproduces the same roots byte for byte.
    for version in 4..6u64 {
        db.upsert(update_for(version), version).unwrap();
        assert_eq!(db.root_hash(), hashes[version as usize]);
    }
    assert_eq!(db.get(b"\x31\x41", 5).unwrap(), be_key(5));

    // Rewinding to the latest version is a no-op.
    let before = db.root_hash();
    db.rewind_to_version(5).unwrap();
    assert_eq!(db.root_hash(), before);
}

#[test]
fn auto_expiring_keys_die_with_the_window() {
    let mut db = Db::open(
        Box::new(auto_expire(3)),
        DbConfig {
            fixed_history_length: Some(5),
            ..small_config()
        },
    )
    .unwrap();
    for version in 0..10u64 {
        db.upsert(
            vec![make_update(&be_key(version), &be_key(version)).with_version(version)],
            version,
        )
        .unwrap();
    }
    let latest = db.get_latest_version().unwrap();
    let earliest = db.get_earliest_version().unwrap();
    assert_eq!((earliest, latest), (5, 9));
    for i in 0..10u64 {
        let result = db.get(&be_key(i), latest);
        if i < earliest {
            assert!(result.is_err(), "key {} should have expired", i);
        } else {
            assert_eq!(result.unwrap(), be_key(i), "key {} should be live", i);
        }
    }
}

struct LeafCounter {
    leaves: Arc<AtomicUsize>,
}

impl TraverseMachine for LeafCounter {
    fn down(&mut self, _branch: u8, node: &Node) -> bool {
        if node.has_value() {
            self.leaves.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    fn up(&mut self, _branch: u8, _node: &Node) {}

    fn clone_boxed(&self) -> Box<dyn TraverseMachine> {
        Box::new(LeafCounter {
            leaves: self.leaves.clone(),
        })
    }
}

#[test]
fn parallel_traverse_visits_every_leaf() {
    let mut db = merkle_db(DbConfig {
        worker_threads: 2,
        ..small_config()
    });
    let nkeys = 300u64;
    let mut updates = Vec::new();
    for i in 0..nkeys {
        updates.push(make_update(&be_key(i.wrapping_mul(0x9e3779b97f4a7c15)), b"leaf"));
    }
    db.upsert(updates, 0).unwrap();

    let leaves = Arc::new(AtomicUsize::new(0));
    let mut machine = LeafCounter { leaves: leaves.clone() };
    db.traverse(&mut machine, 0).unwrap();
    assert_eq!(leaves.load(Ordering::Relaxed), nkeys as usize);

    leaves.store(0, Ordering::Relaxed);
    let mut machine = LeafCounter { leaves: leaves.clone() };
    db.traverse_blocking(&mut machine, 0).unwrap();
    assert_eq!(leaves.load(Ordering::Relaxed), nkeys as usize);
}

#[test]
fn load_all_warms_the_cache_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_db_file(&dir, 24, 16);
    let config = DbConfig {
        dbname_paths: vec![path],
        worker_threads: 2,
        ..small_config()
    };
    {
        let mut db = merkle_db(config.clone());
        let mut updates = Vec::new();
        for i in 0..200u64 {
            updates.push(make_update(&be_key(i.wrapping_mul(0x2545f4914f6cdd1d)), b"x"));
        }
        db.upsert(updates, 0).unwrap();
    }
    // Reopen cold: the first walk loads everything, the second nothing.
    let db = merkle_db(DbConfig {
        append: true,
        ..config
    });
    let first = db.load_all(0).unwrap();
    assert!(first > 0);
    let second = db.load_all(0).unwrap();
    assert_eq!(second, 0);
}

#[test]
fn plain_trie_supports_variable_length_keys() {
    let mut db = Db::open(
        Box::new(StateMachineAlwaysEmpty::default()),
        small_config(),
    )
    .unwrap();
    db.upsert(
        vec![
            make_update(b"\x02\x34\x56\x78", b"\xde\xad"),
            make_update(b"\x12\x34\x56\x78", b"\xbe\xef"),
            make_update(b"\x12\x34", b"\xba"),
            make_update(b"\x12", b"\xde\xad\xbe\xef"),
        ],
        0,
    )
    .unwrap();
    assert_eq!(db.get(b"\x12", 0).unwrap(), b"\xde\xad\xbe\xef");
    assert_eq!(db.get(b"\x12\x34", 0).unwrap(), b"\xba");
    assert_eq!(db.get(b"\x12\x34\x56\x78", 0).unwrap(), b"\xbe\xef");
    assert_eq!(db.get(b"\x02\x34\x56\x78", 0).unwrap(), b"\xde\xad");
    assert!(db.get(b"\x12\x34\x56", 0).is_err());
}
