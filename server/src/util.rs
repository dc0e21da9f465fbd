use chrono::{DateTime, Duration, Utc};

const EXPIRY_MARGIN_SECS: i64 = 30;

pub fn check_expired(expires_at: DateTime<Utc>) -> bool {
    let now_with_margin = Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS);
    now_with_margin > expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expired_margin() {
        assert!(check_expired(Utc::now() - Duration::minutes(1)));
        assert!(check_expired(Utc::now() + Duration::seconds(10)));
        assert!(!check_expired(Utc::now() + Duration::minutes(5)));
    }
}
