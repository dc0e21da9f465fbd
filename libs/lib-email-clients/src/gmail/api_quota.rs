//! Gmail per-user quota units.
//!
//! See <https://developers.google.com/gmail/api/reference/quota>.

pub const GMAIL_QUOTA_PER_SECOND: usize = 250;

pub struct GmailApiQuota {
    pub messages_send: usize,
    pub get_profile: usize,
}

pub const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_send: 100,
    get_profile: 1,
};
