//! Tests for spreadsheet bodies

use ticker_collector::infra::sheets::{parse_foreign_flow_rows, parse_impact_rows, SheetValues};
use ticker_collector::models::ImpactStatistics;

const IMPACT_BODY: &str = r#"{
    "range": "Sheet1!A1:B5",
    "majorDimension": "ROWS",
    "values": [
        ["Ticker", "Impact"],
        ["vcb", "1,25"],
        ["BID", "-0.5"],
        ["CTG", "0"],
        ["GAS"]
    ]
}"#;

#[test]
fn test_impact_body_to_statistics() {
    let body: SheetValues = serde_json::from_str(IMPACT_BODY).unwrap();
    assert_eq!(body.range.as_deref(), Some("Sheet1!A1:B5"));

    let entries = parse_impact_rows(&body.values.unwrap());
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].symbol, "VCB");
    assert_eq!(entries[0].impact_index, 1.25);

    let stats = ImpactStatistics::from_entries(&entries);
    assert_eq!((stats.positive, stats.negative, stats.neutral), (1, 1, 1));
    assert_eq!(stats.max, 1.25);
    assert_eq!(stats.min, -0.5);
}

#[test]
fn test_empty_range_has_no_values() {
    let body: SheetValues = serde_json::from_str(r#"{"range": "Sheet1!A1:E1"}"#).unwrap();
    assert!(body.values.is_none());
}

#[test]
fn test_foreign_flow_body() {
    let body: SheetValues = serde_json::from_str(
        r#"{"values": [
            ["Ticker", "Buy vol", "Buy val", "Sell vol", "Sell val"],
            ["HPG", "2,000", "50,000,000", "500", "12,500,000"],
            ["SSI", 100, 2500, 300, 7500]
        ]}"#,
    )
    .unwrap();

    let entries = parse_foreign_flow_rows(&body.values.unwrap());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].net_value(), 37_500_000.0);
    assert_eq!(entries[1].net_value(), -5_000.0);
}
