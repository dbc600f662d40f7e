//! Cache operation tests against the in-process backend

mod common;

#[cfg(test)]
mod tests {
    use super::common::{setup_test_cache, setup_test_cache_with};
    use num_bigint::BigInt;
    use sentinel_cache::{CacheConfig, CacheError, CompressorKind, SerializerKind, SetOptions, Timeout};
    use serde::{Deserialize, Serialize};
    use std::collections::{HashMap, HashSet};
    use std::thread;
    use std::time::Duration;

    const I64_MAX_PLUS_ONE: &str = "9223372036854775808";

    fn big(text: &str) -> BigInt {
        text.parse().unwrap()
    }

    #[test]
    fn test_setnx() {
        let (_cluster, cache) = setup_test_cache();
        assert!(cache.get::<i64, _>("test_key_nx", None).unwrap().is_none());

        assert!(cache.set("test_key_nx", &1, SetOptions::new().nx()).unwrap());
        assert!(!cache.set("test_key_nx", &2, SetOptions::new().nx()).unwrap());
        assert_eq!(cache.get::<i64, _>("test_key_nx", None).unwrap(), Some(1));

        cache.delete("test_key_nx", None).unwrap();
        assert!(cache.get::<i64, _>("test_key_nx", None).unwrap().is_none());
    }

    #[test]
    fn test_setnx_timeout() {
        let (_cluster, cache) = setup_test_cache();
        let short = SetOptions::new().timeout(Timeout::Millis(100)).nx();

        assert!(cache.set("test_key_nx", &1, short).unwrap());
        thread::sleep(Duration::from_millis(200));
        assert!(cache.get::<i64, _>("test_key_nx", None).unwrap().is_none());

        // an existing key keeps its value and its (absent) expiry
        cache.set("test_key_nx", &1, SetOptions::new()).unwrap();
        assert!(!cache.set("test_key_nx", &2, short).unwrap());
        thread::sleep(Duration::from_millis(200));
        assert_eq!(cache.get::<i64, _>("test_key_nx", None).unwrap(), Some(1));
    }

    #[test]
    fn test_save_integer() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("test_key", &2, SetOptions::new()).unwrap();
        assert_eq!(cache.get::<i64, _>("test_key", None).unwrap(), Some(2));
    }

    #[test]
    fn test_save_string() {
        let (_cluster, cache) = setup_test_cache();
        let long = "hello".repeat(1000);
        cache.set("test_key", &long, SetOptions::new()).unwrap();
        assert_eq!(cache.get::<String, _>("test_key", None).unwrap(), Some(long));

        cache.set("test_key", "2", SetOptions::new()).unwrap();
        assert_eq!(
            cache.get::<String, _>("test_key", None).unwrap().as_deref(),
            Some("2")
        );
    }

    #[test]
    fn test_save_unicode() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("test_key", "heló", SetOptions::new()).unwrap();
        assert_eq!(
            cache.get::<String, _>("test_key", None).unwrap().as_deref(),
            Some("heló")
        );
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        date: String,
        name: String,
    }

    #[test]
    fn test_save_struct_with_every_codec() {
        let record = Record {
            id: 1,
            date: "2024-01-01T10:00:00".to_string(),
            name: "Foo".to_string(),
        };

        for serializer in [SerializerKind::Json, SerializerKind::MsgPack] {
            for compressor in [CompressorKind::None, CompressorKind::Lz4, CompressorKind::Zstd] {
                let (_cluster, cache) = setup_test_cache_with(|c| {
                    c.with_serializer(serializer).with_compressor(compressor)
                });
                cache.set("test_key", &record, SetOptions::new()).unwrap();
                assert_eq!(cache.get::<Record, _>("test_key", None).unwrap().as_ref(), Some(&record));
            }
        }
    }

    #[test]
    fn test_save_float_and_bool() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("float", &1.345620002f64, SetOptions::new()).unwrap();
        assert_eq!(cache.get::<f64, _>("float", None).unwrap(), Some(1.345620002));

        cache.set("bool", &true, SetOptions::new()).unwrap();
        assert_eq!(cache.get::<bool, _>("bool", None).unwrap(), Some(true));
        cache.set("bool", &false, SetOptions::new()).unwrap();
        assert_eq!(cache.get::<bool, _>("bool", None).unwrap(), Some(false));
    }

    #[test]
    fn test_timeout() {
        let (_cluster, cache) = setup_test_cache();
        cache
            .set("test_key", &222, SetOptions::new().timeout(Timeout::Millis(100)))
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(cache.get::<i64, _>("test_key", None).unwrap().is_none());
    }

    #[test]
    fn test_timeout_0() {
        let (_cluster, cache) = setup_test_cache();
        cache
            .set("test_key", &222, SetOptions::new().timeout(Timeout::Seconds(0)))
            .unwrap();
        assert!(cache.get::<i64, _>("test_key", None).unwrap().is_none());
    }

    #[test]
    fn test_set_add() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("add_key", "Initial value", SetOptions::new()).unwrap();
        assert!(!cache.add("add_key", "New value", Timeout::Default).unwrap());
        assert_eq!(
            cache.get::<String, _>("add_key", None).unwrap().as_deref(),
            Some("Initial value")
        );
    }

    #[test]
    fn test_get_many() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("a", "1", SetOptions::new()).unwrap();
        cache.set("b", "2", SetOptions::new()).unwrap();
        cache.set("c", "3", SetOptions::new()).unwrap();

        let found: HashMap<String, String> = cache.get_many(&["a", "b", "c", "missing"], None).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found["a"], "1");
        assert!(!found.contains_key("missing"));
    }

    #[test]
    fn test_set_many_and_delete() {
        let (_cluster, cache) = setup_test_cache();
        cache
            .set_many([("a", 1), ("b", 2), ("c", 3)], Timeout::Default, None)
            .unwrap();

        let found: HashMap<String, i64> = cache.get_many(&["a", "b", "c"], None).unwrap();
        assert_eq!(found, HashMap::from([("a".into(), 1), ("b".into(), 2), ("c".into(), 3)]));

        assert!(cache.delete("a", None).unwrap());
        let found: HashMap<String, i64> = cache.get_many(&["a", "b", "c"], None).unwrap();
        assert_eq!(found, HashMap::from([("b".into(), 2), ("c".into(), 3)]));
        assert!(!cache.delete("a", None).unwrap());
    }

    #[test]
    fn test_delete_many() {
        let (_cluster, cache) = setup_test_cache();
        cache
            .set_many([("a", 1), ("b", 2), ("c", 3)], Timeout::Default, None)
            .unwrap();

        assert_eq!(cache.delete_many(["a", "b"].iter(), None).unwrap(), 2);
        let found: HashMap<String, i64> = cache.get_many(&["a", "b", "c"], None).unwrap();
        assert_eq!(found, HashMap::from([("c".into(), 3)]));
        assert_eq!(cache.delete_many(["a", "b"], None).unwrap(), 0);
    }

    #[test]
    fn test_delete_many_empty_skips_store() {
        let (cluster, cache) = setup_test_cache();
        let served_before = cluster.commands_served(&super::common::master());

        assert_eq!(cache.delete_many(Vec::<String>::new(), None).unwrap(), 0);
        assert_eq!(cluster.commands_served(&super::common::master()), served_before);
    }

    #[test]
    fn test_incr() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("num", &1, SetOptions::new()).unwrap();

        assert_eq!(cache.incr("num", 1, None).unwrap(), BigInt::from(2));
        assert_eq!(cache.incr("num", 10, None).unwrap(), BigInt::from(12));
        assert_eq!(cache.get::<i64, _>("num", None).unwrap(), Some(12));

        cache.set("num", &i64::MAX, SetOptions::new()).unwrap();
        assert_eq!(cache.incr("num", 1, None).unwrap(), big(I64_MAX_PLUS_ONE));
        assert_eq!(cache.get::<u64, _>("num", None).unwrap(), Some(9223372036854775808));

        assert_eq!(cache.incr("num", 2, None).unwrap(), big("9223372036854775810"));
        assert_eq!(cache.get::<u64, _>("num", None).unwrap(), Some(9223372036854775810));

        cache.set("num", &3, SetOptions::new()).unwrap();
        assert_eq!(cache.incr("num", 2, None).unwrap(), BigInt::from(5));
    }

    #[test]
    fn test_incr_beyond_u64() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("num", &u64::MAX, SetOptions::new()).unwrap();
        assert_eq!(cache.incr("num", 1, None).unwrap(), big("18446744073709551616"));
        assert_eq!(cache.decr("num", 1, None).unwrap(), BigInt::from(u64::MAX));
    }

    #[test]
    fn test_incr_missing_key() {
        let (_cluster, cache) = setup_test_cache();
        let err = cache.incr("numnum", 1, None).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
        assert!(!cache.has_key("numnum", None).unwrap());
    }

    #[test]
    fn test_decr() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("num", &20, SetOptions::new()).unwrap();

        assert_eq!(cache.decr("num", 1, None).unwrap(), BigInt::from(19));
        assert_eq!(cache.decr("num", 20, None).unwrap(), BigInt::from(-1));
        assert_eq!(cache.decr("num", 2, None).unwrap(), BigInt::from(-3));
        assert_eq!(cache.get::<i64, _>("num", None).unwrap(), Some(-3));

        cache.set("num", &9223372036854775808u64, SetOptions::new()).unwrap();
        assert_eq!(cache.decr("num", 1, None).unwrap(), BigInt::from(i64::MAX));
        assert_eq!(cache.get::<i64, _>("num", None).unwrap(), Some(i64::MAX));
        assert_eq!(cache.decr("num", 2, None).unwrap(), BigInt::from(9223372036854775805i64));
    }

    #[test]
    fn test_decr_below_i64_min() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("num", &i64::MIN, SetOptions::new()).unwrap();
        assert_eq!(cache.decr("num", 1, None).unwrap(), big("-9223372036854775809"));
        assert_eq!(cache.incr("num", 1, None).unwrap(), BigInt::from(i64::MIN));
    }

    #[test]
    fn test_version() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("keytest", &2, SetOptions::new().version(2)).unwrap();
        assert!(cache.get::<i64, _>("keytest", None).unwrap().is_none());
        assert_eq!(cache.get::<i64, _>("keytest", Some(2)).unwrap(), Some(2));
    }

    #[test]
    fn test_incr_version() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("keytest", &2, SetOptions::new().timeout(Timeout::Seconds(50))).unwrap();

        assert_eq!(cache.incr_version("keytest", 1, None).unwrap(), 2);
        assert!(cache.get::<i64, _>("keytest", None).unwrap().is_none());
        assert_eq!(cache.get::<i64, _>("keytest", Some(2)).unwrap(), Some(2));

        let ttl = cache.ttl("keytest", Some(2)).unwrap().unwrap();
        assert!((1..=50).contains(&ttl));
    }

    #[test]
    fn test_delete_pattern() {
        let (_cluster, cache) = setup_test_cache();
        for key in ["foo-aa", "foo-ab", "foo-bb", "foo-bc"] {
            cache.set(key, "foo", SetOptions::new()).unwrap();
        }

        assert_eq!(cache.delete_pattern("*foo-a*", None, None).unwrap(), 2);

        let keys: HashSet<String> = cache.keys("foo*", None).unwrap().into_iter().collect();
        assert_eq!(keys, HashSet::from(["foo-bb".to_string(), "foo-bc".to_string()]));

        assert_eq!(cache.delete_pattern("*foo-a*", None, None).unwrap(), 0);
    }

    #[test]
    fn test_delete_pattern_in_small_batches() {
        let (cluster, cache) = setup_test_cache();
        for i in 0..50 {
            cache.set(format!("bulk:{}", i), &i, SetOptions::new()).unwrap();
        }
        cache.set("other", &1, SetOptions::new()).unwrap();

        assert_eq!(cache.delete_pattern("bulk:*", None, Some(7)).unwrap(), 50);
        assert_eq!(cluster.key_count(0), 1);
    }

    #[test]
    fn test_delete_pattern_respects_version() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("foo", &1, SetOptions::new()).unwrap();
        cache.set("foo", &1, SetOptions::new().version(2)).unwrap();

        assert_eq!(cache.delete_pattern("foo", Some(2), None).unwrap(), 1);
        assert!(cache.has_key("foo", None).unwrap());
    }

    #[test]
    fn test_close() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("f", "1", SetOptions::new()).unwrap();
        cache.close();
        assert_eq!(cache.client().stats().write.idle, 0);
        assert_eq!(cache.get::<String, _>("f", None).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_ttl() {
        let (_cluster, cache) = setup_test_cache();

        cache.set("foo", "bar", SetOptions::new().timeout(Timeout::Seconds(10))).unwrap();
        let ttl = cache.ttl("foo", None).unwrap().unwrap();
        assert!((9..=10).contains(&ttl));

        cache.set("foo", "foo", SetOptions::new().timeout(Timeout::Never)).unwrap();
        assert_eq!(cache.ttl("foo", None).unwrap(), None);

        cache.set("foo", "foo", SetOptions::new().timeout(Timeout::Seconds(-1))).unwrap();
        assert_eq!(cache.ttl("foo", None).unwrap(), Some(0));

        assert_eq!(cache.ttl("not-existent-key", None).unwrap(), Some(0));
    }

    #[test]
    fn test_persist() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("foo", "bar", SetOptions::new().timeout(Timeout::Seconds(20))).unwrap();
        assert!(cache.persist("foo", None).unwrap());
        assert_eq!(cache.ttl("foo", None).unwrap(), None);
    }

    #[test]
    fn test_expire() {
        let (_cluster, cache) = setup_test_cache();
        cache.set("foo", "bar", SetOptions::new().timeout(Timeout::Never)).unwrap();
        assert!(cache.expire("foo", 20, None).unwrap());
        assert!(cache.ttl("foo", None).unwrap().unwrap() >= 19);
        assert!(!cache.expire("missing", 20, None).unwrap());
    }

    #[test]
    fn test_iter_keys() {
        let (_cluster, cache) = setup_test_cache();
        for key in ["foo1", "foo2", "foo3"] {
            cache.set(key, &1, SetOptions::new()).unwrap();
        }

        let all: HashSet<String> = cache
            .iter_keys("foo*", None, None)
            .collect::<sentinel_cache::Result<_>>()
            .unwrap();
        assert_eq!(all, HashSet::from(["foo1".into(), "foo2".into(), "foo3".into()]));

        let limited: Vec<String> = cache
            .iter_keys("foo*", None, Some(2))
            .collect::<sentinel_cache::Result<_>>()
            .unwrap();
        assert_eq!(limited.len(), 3);

        let mut lazy = cache.iter_keys("foo*", None, None);
        assert!(lazy.next().unwrap().is_ok());
    }

    #[test]
    fn test_iter_keys_no_duplicates_for_any_itersize() {
        let (_cluster, cache) = setup_test_cache();
        for i in 0..25 {
            cache.set(format!("item:{}", i), &i, SetOptions::new()).unwrap();
            cache.set(format!("skip:{}", i), &i, SetOptions::new()).unwrap();
        }

        for itersize in [1, 2, 7, 25, 1000] {
            let keys: Vec<String> = cache
                .iter_keys("item:*", None, Some(itersize))
                .collect::<sentinel_cache::Result<_>>()
                .unwrap();
            let unique: HashSet<&String> = keys.iter().collect();
            assert_eq!(keys.len(), 25, "itersize {}", itersize);
            assert_eq!(unique.len(), 25, "itersize {}", itersize);
        }
    }

    #[test]
    fn test_prefix_with_glob_characters() {
        let (_cluster, cache) = setup_test_cache_with(|c| c.with_key_prefix("app[1]"));
        cache.set("k", &1, SetOptions::new()).unwrap();
        assert_eq!(cache.keys("*", None).unwrap(), vec!["k"]);
    }

    #[test]
    fn test_has_key_and_clear() {
        let (cluster, cache) = setup_test_cache();
        cache.set("a", &1, SetOptions::new()).unwrap();
        assert!(cache.has_key("a", None).unwrap());
        assert!(!cache.has_key("b", None).unwrap());

        cache.clear().unwrap();
        assert_eq!(cluster.key_count(0), 0);
    }

    #[test]
    fn test_databases_are_isolated() {
        let (cluster, cache) = setup_test_cache();
        let other = sentinel_cache::Cache::with_connector(
            CacheConfig::new(cluster.sentinel_location(3)).with_key_prefix("test"),
            std::sync::Arc::new(cluster.clone()),
        )
        .unwrap();

        cache.set("k", &1, SetOptions::new()).unwrap();
        assert!(other.get::<i64, _>("k", None).unwrap().is_none());
        assert_eq!(cluster.key_count(0), 1);
        assert_eq!(cluster.key_count(3), 0);
    }
}
