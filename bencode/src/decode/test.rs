use serde_derive::Deserialize;
use std::collections::BTreeMap;
use super::decode_str;

#[test]
fn decode_to_num() {
    let r: i64 = decode_str("i666e").unwrap();
    assert_eq!(r, 666);
}

#[test]
fn decode_negative_num() {
    let r: i64 = decode_str("i-42e").unwrap();
    assert_eq!(r, -42);
}

#[test]
fn decode_to_string() {
    let r: String = decode_str("3:yes").unwrap();
    assert_eq!(r, "yes");
}

#[test]
fn decode_to_struct() {
    let b = "d1:xi1111e1:y3:dog1:z2:yoe";
    #[derive(PartialEq, Debug, Deserialize)]
    struct Fake {
        y: String,
        x: i64,
        #[serde(default)]
        z: Option<String>,
        #[serde(default)]
        a: Option<String>,
    }
    let r: Fake = decode_str(b).unwrap();
    assert_eq!(
        r,
        Fake {
            x: 1111,
            y: "dog".to_string(),
            z: Some("yo".to_string()),
            a: None,
        }
    );
}

#[test]
fn decode_to_map() {
    let r: BTreeMap<String, i64> = decode_str("d1:xi1111e1:yi2ee").unwrap();
    let mut d = BTreeMap::new();
    d.insert("x".to_string(), 1111);
    d.insert("y".to_string(), 2);
    assert_eq!(r, d);
}

#[test]
fn deserialize_to_vec() {
    let r: Vec<i64> = decode_str("li666ee").unwrap();
    assert_eq!(r, [666]);
}

#[test]
fn truncated_input_is_an_error() {
    let r: Result<i64, _> = decode_str("i666");
    assert!(r.is_err());
}
