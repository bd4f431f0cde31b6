use chrono::{Datelike, TimeZone, Utc, Weekday};
use cron::Schedule;
use leader_common::Config;
use std::str::FromStr;

#[test]
fn test_default_run_cron_is_valid() {
    let config = Config::default();
    let schedule = Schedule::from_str(&config.schedule.run_cron);
    assert!(schedule.is_ok(), "Default run_cron should parse: {}", config.schedule.run_cron);
}

#[test]
fn test_five_field_expression_needs_seconds() {
    let five = "0 18 * * Mon-Fri";
    assert!(Schedule::from_str(five).is_err(), "Five-field expressions are rejected");
    assert!(Schedule::from_str(&format!("0 {}", five)).is_ok());
}

#[test]
fn test_weekday_names_fire_on_trading_days() {
    let schedule = Schedule::from_str("0 0 18 * * Mon-Fri").unwrap();
    let sunday = Utc.with_ymd_and_hms(2024, 6, 9, 0, 0, 0).unwrap();

    let days: Vec<Weekday> = schedule.after(&sunday).take(6).map(|t| t.weekday()).collect();
    assert_eq!(
        days,
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Mon]
    );
}
