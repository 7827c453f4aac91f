//! Tests for trigger expressions

use std::collections::BTreeSet;

use chrono::{Datelike, TimeZone, Timelike, Weekday};
use chrono_tz::Asia::Ho_Chi_Minh;
use ticker_collector::core::{time_until, TriggerExpression};

#[test]
fn test_describe_common_shapes() {
    let daily = TriggerExpression::parse("0 8 * * *").unwrap();
    assert_eq!(daily.describe(), "at 08:00 every day");

    let technical = TriggerExpression::parse("*/30 9-15 * * Mon-Fri").unwrap();
    assert_eq!(
        technical.describe(),
        "every 30 minutes during hours 9-15 on Mon-Fri"
    );

    let monthly = TriggerExpression::parse("0 0 1 * *").unwrap();
    assert_eq!(monthly.describe(), "cron `0 0 1 * *`");
}

#[test]
fn test_invalid_expressions() {
    assert!(TriggerExpression::parse("").is_err());
    assert!(TriggerExpression::parse("0 8 * *").is_err());
    assert!(TriggerExpression::parse("61 8 * * *").is_err());
}

#[test]
fn test_next_fire_in_local_time() {
    let technical = TriggerExpression::parse("*/30 9-15 * * Mon-Fri").unwrap();

    // Friday 2024-05-03 15:45 local: next fire is Monday 09:00.
    let friday = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 3, 15, 45, 0).unwrap();
    let next = technical.next_after(&friday).unwrap();
    assert_eq!(next, Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap());

    // Inside trading hours the next half hour is used.
    let tuesday = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 7, 10, 10, 0).unwrap();
    let next = technical.next_after(&tuesday).unwrap();
    assert_eq!((next.hour(), next.minute()), (10, 30));
}

#[test]
fn test_time_until_formats() {
    let now = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 3, 6, 15, 0).unwrap();
    let later = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap();
    let soon = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 3, 6, 40, 0).unwrap();

    assert_eq!(time_until(&later, &now), "1h 45m");
    assert_eq!(time_until(&soon, &now), "25m");
    assert_eq!(time_until(&now, &later), "Past due");
}

fn fire_days(expression: &str) -> BTreeSet<u32> {
    let expr = TriggerExpression::parse(expression).unwrap();
    let mut at = Ho_Chi_Minh.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap();
    let mut days = BTreeSet::new();
    for _ in 0..14 {
        at = expr.next_after(&at).unwrap();
        assert_eq!(at.hour(), 9);
        days.insert(at.weekday().num_days_from_sunday());
    }
    days
}

fn days(list: &[Weekday]) -> BTreeSet<u32> {
    list.iter().map(Weekday::num_days_from_sunday).collect()
}

#[test]
fn test_classic_sunday_numbers() {
    use Weekday::{Fri, Mon, Sat, Sun, Thu, Tue, Wed};

    assert_eq!(fire_days("0 9 * * 1-7"), days(&[Mon, Tue, Wed, Thu, Fri, Sat, Sun]));
    assert_eq!(fire_days("0 9 * * 5-7"), days(&[Fri, Sat, Sun]));
    assert_eq!(fire_days("0 9 * * 0-6"), days(&[Sun, Mon, Tue, Wed, Thu, Fri, Sat]));
    assert_eq!(fire_days("0 9 * * 6,0"), days(&[Sat, Sun]));
    assert_eq!(fire_days("0 9 * * 7"), days(&[Sun]));
    assert_eq!(fire_days("0 9 * * 1-5"), days(&[Mon, Tue, Wed, Thu, Fri]));
}
