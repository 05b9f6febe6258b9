//! JSON shape of spans and items with the `serde` feature.
#![cfg(feature = "serde")]

use feedsync_core::{AggregateBucket, Message, TimeRange, ToxicityScore};

#[test]
fn message_json_round_trip() {
    let msg = Message::new("1150", 1_700_000_000_000)
        .with_content("42", "hello there")
        .with_toxicity(ToxicityScore::new(0.12));
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"timestamp\":1700000000000"));
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn bucket_timespan_serializes_bounds() {
    let bucket = AggregateBucket {
        timespan: TimeRange::new(0, 60_000).unwrap(),
        message_count: 3,
        flagged_count: 0,
    };
    let value = serde_json::to_value(bucket).unwrap();
    assert_eq!(value["timespan"]["start"], 0);
    assert_eq!(value["timespan"]["end"], 60_000);
}

#[test]
fn inverted_or_empty_range_is_rejected() {
    let inverted = serde_json::from_str::<TimeRange>(r#"{"start":9,"end":3}"#).unwrap_err();
    assert!(inverted.to_string().contains("empty time range"));
    assert!(serde_json::from_str::<TimeRange>(r#"{"start":5,"end":5}"#).is_err());

    let ok: TimeRange = serde_json::from_str(r#"{"start":3,"end":9}"#).unwrap();
    assert_eq!(ok, TimeRange::new(3, 9).unwrap());
}

#[test]
fn bucket_with_inverted_timespan_is_rejected() {
    let json = r#"{"timespan":{"start":120000,"end":60000},"message_count":1,"flagged_count":0}"#;
    assert!(serde_json::from_str::<AggregateBucket>(json).is_err());
}
