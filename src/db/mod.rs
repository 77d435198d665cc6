pub mod accounts;
pub mod notification_outbox;
pub mod password_reset_tokens;
