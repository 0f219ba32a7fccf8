use chrono::{DateTime, NaiveDate, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn from_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp. Dates after today are rejected.
pub fn parse_birth_date(raw: &str) -> anyhow::Result<NaiveDate> {
    let raw = raw.trim();
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => from_rfc3339(raw)?.date_naive(),
    };
    if date > now().date_naive() {
        anyhow::bail!("birth date {} is in the future", date);
    }
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_rfc3339_dates() {
        assert_eq!(
            parse_birth_date("1990-04-12").unwrap(),
            NaiveDate::from_ymd_opt(1990, 4, 12).unwrap()
        );
        assert_eq!(
            parse_birth_date("1990-04-12T10:00:00Z").unwrap(),
            NaiveDate::from_ymd_opt(1990, 4, 12).unwrap()
        );
    }

    #[test]
    fn rejects_future_and_garbage() {
        assert!(parse_birth_date("2999-01-01").is_err());
        assert!(parse_birth_date("12/04/1990").is_err());
    }
}
