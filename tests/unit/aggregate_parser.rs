//! Chart responses as the server returns them

use loginsight_export::binfit::{contiguous, patch_boundaries, sort_by_start, total_count};
use loginsight_export::fetcher::aggregate::AggregateParser;
use loginsight_export::fetcher::FetcherError;
use loginsight_export::Bin;
use serde_json::{json, Value};

/// 13 buckets of 100ms, newest first
fn chart() -> Value {
    let counts = [
        8653, 10939, 6344, 1848, 1791, 489, 462, 384, 986, 383, 319, 1410, 182,
    ];
    let rows: Vec<Value> = counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            let val = 1483235882100i64 - 100 * i as i64;
            json!({
                "groupByValues": [{"isTime": true, "val": val, "endVal": val + 99}],
                "aggregationValues": [count]
            })
        })
        .collect();
    json!({
        "groupByHeaders": [{"displayNamespace": null, "isTime": true, "displayName": "time", "internalName": "timestamp"}],
        "rows": rows,
        "aggregationHeaders": [{"func": "COUNT", "funcDisplayName": "Count"}]
    })
}

#[test]
fn test_parse_descending_chart() {
    let bins = sort_by_start(AggregateParser::parse_chart(&chart()).unwrap());

    assert_eq!(bins.len(), 13);
    assert_eq!(bins[0], Bin::new(1483235880900, 1483235880999, 182));
    assert_eq!(bins[12], Bin::new(1483235882100, 1483235882199, 8653));
    assert!(contiguous(&bins));
    assert_eq!(total_count(&bins), 34190);
}

#[test]
fn test_parse_then_patch_to_query_range() {
    let bins = AggregateParser::parse_chart(&chart()).unwrap();
    let patched = sort_by_start(patch_boundaries(1483235880950, 1483235882150, bins).collect());

    assert_eq!(patched.first().unwrap().start, 1483235880950);
    assert_eq!(patched.last().unwrap().end, 1483235882150);
    assert_eq!(total_count(&patched), 34190);
}

#[test]
fn test_float_values_accepted() {
    let body = json!({
        "groupByHeaders": [{"isTime": true}],
        "rows": [{"groupByValues": [{"val": 1000.0, "endVal": 1999.0}], "aggregationValues": [12.0]}]
    });
    assert_eq!(
        AggregateParser::parse_chart(&body).unwrap(),
        vec![Bin::new(1000, 1999, 12)]
    );
}

#[test]
fn test_grouped_by_time_and_source_rejected() {
    let body = json!({
        "groupByHeaders": [
            {"displayName": "time", "internalName": "timestamp", "isTime": true, "displayNamespace": null},
            {"displayName": "source", "internalName": "__li_source_path", "isTime": false, "displayNamespace": null}
        ],
        "rows": [{
            "aggregationValues": [100],
            "groupByValues": [
                {"val": 1483154100000i64, "isTime": true, "endVal": 1483154399999i64},
                {"val": "192.168.50.1", "tooltipVal": "192.168.50.1", "fieldType": "STRING", "operator": "CONTAINS"}
            ]
        }],
        "aggregationHeaders": [{"funcDisplayName": "Count", "func": "COUNT"}]
    });
    assert!(matches!(
        AggregateParser::parse_chart(&body),
        Err(FetcherError::UnsupportedGrouping(_))
    ));
}

#[test]
fn test_negative_count_rejected() {
    let body = json!({
        "groupByHeaders": [{"isTime": true}],
        "rows": [{"groupByValues": [{"val": 0, "endVal": 9}], "aggregationValues": [-1]}]
    });
    assert!(AggregateParser::parse_chart(&body).is_err());
}
