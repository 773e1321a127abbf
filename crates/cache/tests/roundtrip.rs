//! End-to-end behavior of the public cache API

use recache::{ActionId, Cache, Error, Hash, OutputId, TrimPolicy, trim};
use sha2::{Digest as _, Sha256};
use tempfile::TempDir;

fn action_for(description: &[u8]) -> ActionId {
    let mut hash = Hash::new("test");
    hash.write(description);
    ActionId(hash.sum())
}

#[test]
fn hello_roundtrip_matches_content_hash() {
    let tmp = TempDir::new().unwrap();
    let cache = Cache::open(tmp.path()).unwrap();
    let key = action_for(b"say hello");

    let (output, size) = cache.put_bytes(key, b"hello").unwrap();
    assert_eq!(size, 5);
    // Output identity is the unsalted content hash, independent of the
    // salted action hashing.
    assert_eq!(*output.as_bytes(), <[u8; 32]>::from(Sha256::digest(b"hello")));

    let found = cache.get(key).unwrap();
    assert_eq!(found.output, output);
    assert_eq!(found.size, 5);

    let (data, _) = cache.get_bytes(key).unwrap();
    assert_eq!(data, b"hello");
}

#[test]
fn second_process_sees_the_first_ones_writes() {
    let tmp = TempDir::new().unwrap();
    let key = action_for(b"shared work");

    // Two independent handles over one directory stand in for two
    // processes: there is no in-memory state to go stale.
    let writer = Cache::open(tmp.path()).unwrap();
    writer.put_bytes(key, b"result bytes").unwrap();

    let reader = Cache::open(tmp.path()).unwrap();
    let (data, entry) = reader.get_bytes(key).unwrap();
    assert_eq!(data, b"result bytes");
    assert_eq!(entry.output, OutputId::from_data(b"result bytes"));
}

#[test]
fn last_writer_wins_for_one_key() {
    let tmp = TempDir::new().unwrap();
    let key = action_for(b"unstable output");

    let a = Cache::open(tmp.path()).unwrap();
    let b = Cache::open(tmp.path()).unwrap();
    a.put_bytes(key, b"a").unwrap();
    b.put_bytes(key, b"b").unwrap();

    // Only the newest entry is retrievable; there is no history.
    assert_eq!(a.get_bytes(key).unwrap().0, b"b");
    assert_eq!(b.get_bytes(key).unwrap().0, b"b");
}

#[test]
fn distinct_payloads_get_distinct_outputs() {
    let tmp = TempDir::new().unwrap();
    let cache = Cache::open(tmp.path()).unwrap();

    let (out1, _) = cache.put_bytes(action_for(b"one"), b"payload one").unwrap();
    let (out2, _) = cache.put_bytes(action_for(b"two"), b"payload two").unwrap();
    assert_ne!(out1, out2);
}

#[test]
fn output_file_points_at_readable_blob() {
    let tmp = TempDir::new().unwrap();
    let cache = Cache::open(tmp.path()).unwrap();
    let key = action_for(b"streamable");

    cache.put_bytes(key, b"large output, read from its path").unwrap();
    let entry = cache.get(key).unwrap();
    let blob = cache.output_file(entry.output);
    assert_eq!(
        std::fs::read(blob).unwrap(),
        b"large output, read from its path"
    );
}

#[test]
fn put_from_a_real_file_streams_correctly() {
    let tmp = TempDir::new().unwrap();
    let cache = Cache::open(tmp.path()).unwrap();
    let key = action_for(b"file-backed");

    let src_path = tmp.path().join("source.bin");
    let payload = vec![0xa5u8; 200_000];
    std::fs::write(&src_path, &payload).unwrap();

    let mut src = std::fs::File::open(&src_path).unwrap();
    let (output, size) = cache.put(key, &mut src).unwrap();
    assert_eq!(size, payload.len() as u64);
    assert_eq!(output, OutputId::from_data(&payload));
    assert_eq!(cache.get_bytes(key).unwrap().0, payload);
}

#[test]
fn verify_mode_audits_a_whole_session() {
    let tmp = TempDir::new().unwrap();
    let key = action_for(b"deterministic?");

    let normal = Cache::open(tmp.path()).unwrap();
    normal.put_bytes(key, b"run output").unwrap();

    let auditor = Cache::open(tmp.path()).unwrap().with_verify(true);
    // Every lookup misses, forcing recomputation...
    assert!(auditor.get(key).unwrap_err().is_not_found());
    // ...and a reproducible recomputation is accepted,
    auditor.put_bytes(key, b"run output").unwrap();
    // while a divergent one is loudly rejected.
    let err = auditor.put_bytes(key, b"different output").unwrap_err();
    assert!(matches!(err, Error::Verify { .. }));
}

#[test]
fn trim_is_part_of_the_public_surface() {
    let tmp = TempDir::new().unwrap();
    let cache = Cache::open(tmp.path()).unwrap();
    cache.put_bytes(action_for(b"recent"), b"fresh").unwrap();

    let stats = trim(&cache, &TrimPolicy::default()).unwrap();
    assert!(!stats.skipped);
    assert_eq!(stats.files_removed, 0);
    assert_eq!(cache.get_bytes(action_for(b"recent")).unwrap().0, b"fresh");
}
