use fieldstore_persist::{FileStorage, MemoryStorage, Storage};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_key_maps_to_its_own_file(keys in prop::collection::btree_set(".{1,16}", 1..8)) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        for (i, key) in keys.iter().enumerate() {
            storage.set_item(key, &i.to_string()).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            prop_assert_eq!(storage.get_item(key).unwrap(), Some(i.to_string()));
        }
    }

    #[test]
    fn memory_storage_keeps_last_write(writes in prop::collection::vec(("[a-c]", "[0-9]{1,3}"), 1..32)) {
        let storage = MemoryStorage::new();
        for (key, value) in &writes {
            storage.set_item(key, value).unwrap();
        }
        for (key, _) in &writes {
            let last = writes.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone());
            prop_assert_eq!(storage.get_item(key).unwrap(), last);
        }
    }
}
