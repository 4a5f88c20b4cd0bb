mod common;
use aalog_reader::{DecodeError, Error, IndexError, OpenError, QueryKey, Resolution, ResolverError};
use common::{TestEnv, file_names, file_time_of, timestamp_of};
use std::fs;

#[test]
fn test_three_file_rotation_scenario() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 100), (100, 250), (250, 400)]);
  let reader = env.reader();

  let by_msg = |n| file_names(&reader.log_file_paths_for_message_number(n).unwrap());
  assert_eq!(by_msg(100), vec!["log_0000.aaLog", "log_0001.aaLog"]);
  assert_eq!(by_msg(250), vec!["log_0001.aaLog", "log_0002.aaLog"]);
  assert_eq!(by_msg(175), vec!["log_0001.aaLog"]);
  assert_eq!(by_msg(1), vec!["log_0000.aaLog"]);
  assert_eq!(by_msg(400), vec!["log_0002.aaLog"]);
  assert!(by_msg(500).is_empty());
  assert!(by_msg(0).is_empty());
}

#[test]
fn test_all_key_spaces_agree() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 100), (100, 250), (250, 400)]);
  let reader = env.reader();

  for n in [1, 50, 100, 101, 249, 250, 399, 400] {
    let by_msg = reader.log_file_paths_for_message_number(n).unwrap();
    let by_ft = reader.log_file_paths_for_file_time(file_time_of(n)).unwrap();
    let by_ts = reader.log_file_paths_for_timestamp(timestamp_of(n)).unwrap();
    assert!(!by_msg.is_empty(), "message {} unresolved", n);
    assert_eq!(by_msg, by_ft, "message {}", n);
    assert_eq!(by_msg, by_ts, "message {}", n);
  }
}

#[test]
fn test_out_of_range_carries_neighbours() {
  let env = TestEnv::new();
  let files = env.write_rotation(&[(10, 20), (30, 40)]);
  let reader = env.reader();

  match reader.resolve(QueryKey::MessageNumber(25)).unwrap() {
    Resolution::OutOfRange(ResolverError::OutOfRange { below, above, key_space, .. }) => {
      assert_eq!(key_space, "message number");
      assert_eq!(below.as_ref(), Some(&files[0]));
      assert_eq!(above.as_ref(), Some(&files[1]));
    }
    other => panic!("expected OutOfRange, got {:?}", other),
  }

  let after = reader.resolve(QueryKey::FileTime(file_time_of(41))).unwrap();
  assert!(after.is_empty());
  assert!(matches!(after.into_result(), Err(ResolverError::OutOfRange { above: None, .. })));
}

#[test]
fn test_header_index_snapshot() {
  let env = TestEnv::new();
  // Written out of name order; the index orders by header content.
  env.write_log("zz_first.aaLog", 1..=10);
  env.write_log("aa_second.aaLog", 10..=20);
  let reader = env.reader();

  let headers = reader.header_index().unwrap();
  assert_eq!(headers.len(), 2);
  assert_eq!(headers[0].start_msg_number, 1);
  assert_eq!(headers[1].start_msg_number, 10);
  assert!(headers.iter().all(|h| h.sealed));
}

#[test]
fn test_unsealed_active_file_is_indexed_from_records() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 100)]);
  env.write_unsealed("log_0001.aaLog", 101..=150);
  let reader = env.reader();

  assert_eq!(file_names(&reader.log_file_paths_for_message_number(125).unwrap()), vec!["log_0001.aaLog"]);
  assert_eq!(reader.header_index().unwrap()[1].record_count, 50);
}

#[test]
fn test_freshly_rotated_empty_file_is_skipped() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 100)]);
  env.write_unsealed("log_0001.aaLog", 1..=0);
  let reader = env.reader();

  assert_eq!(reader.header_index().unwrap().len(), 1);
  assert_eq!(file_names(&reader.log_file_paths_for_message_number(50).unwrap()), vec!["log_0000.aaLog"]);
}

#[test]
fn test_corrupt_file_aborts_indexing() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 100)]);
  fs::write(env.path("broken.aaLog"), b"not a log file at all").unwrap();
  let reader = env.reader();

  match reader.header_index() {
    Err(Error::Decode { path, source }) => {
      assert_eq!(path, env.path("broken.aaLog"));
      assert!(matches!(source, DecodeError::Truncated { .. }));
    }
    other => panic!("expected Decode error, got {:?}", other),
  }
}

#[test]
fn test_duplicate_file_is_ambiguous() {
  let env = TestEnv::new();
  let original = env.write_log("a.aaLog", 1..=10);
  fs::copy(&original, env.path("a_copy.aaLog")).unwrap();
  let reader = env.reader();

  assert!(matches!(
    reader.log_file_paths_for_message_number(5),
    Err(Error::Index(IndexError::AmbiguousOrdering { .. }))
  ));
}

#[test]
fn test_missing_directory() {
  let env = TestEnv::new();
  let reader = env.reader_with(|o| o.log_directory = o.log_directory.join("absent"));
  assert!(matches!(reader.header_index(), Err(Error::Open(OpenError::NotFound(_)))));
}

#[test]
fn test_other_extensions_are_ignored() {
  let env = TestEnv::new();
  env.write_rotation(&[(1, 10)]);
  fs::write(env.path("notes.txt"), b"unrelated").unwrap();
  let reader = env.reader_with(|o| o.file_extension = "AALOG".into());
  assert_eq!(reader.header_index().unwrap().len(), 1);
}
