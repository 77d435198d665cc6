pub mod account;
pub mod notification;
pub mod reset_token;

pub use account::Account;
pub use notification::OutboxItem;
pub use reset_token::{NewResetToken, Redemption, ResetToken, TokenState, TokenStatus};
