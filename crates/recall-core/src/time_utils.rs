use chrono::{NaiveDate, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns today's UTC date formatted as `YYYY_MM_DD`.
pub fn utc_date_stamp() -> String {
    utc_date_stamp_for(Utc::now().date_naive())
}

/// Formats `date` as `YYYY_MM_DD`.
pub fn utc_date_stamp_for(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::utc_date_stamp_for;

    #[test]
    fn unit_utc_date_stamp_for_zero_pads_month_and_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).expect("valid date");
        assert_eq!(utc_date_stamp_for(date), "2024_03_07");
    }
}
