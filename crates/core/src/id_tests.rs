use super::*;

crate::define_id! {
    pub struct TestId;
}

#[test]
fn display_and_as_str_round_trip() {
    let id = TestId::new("abc");
    assert_eq!(id.as_str(), "abc");
    assert_eq!(id.to_string(), "abc");
}

#[test]
fn short_truncates_long_ids() {
    let id = TestId::new("abcdefgh");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefgh");
}

#[test]
fn short_on_str_matches_id_short() {
    assert_eq!("hello".short(3), "hel");
    assert_eq!("hi".short(10), "hi");
}

#[test]
fn partial_eq_str() {
    let id = TestId::new("x");
    assert_eq!(id, "x");
    assert_eq!(id, *"x".to_string().as_str());
}

#[test]
fn borrow_allows_hashmap_lookup_by_str() {
    use std::collections::HashMap;
    let mut map: HashMap<TestId, u32> = HashMap::new();
    map.insert(TestId::new("a"), 1);
    assert_eq!(map.get("a"), Some(&1));
}
