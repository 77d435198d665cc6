use chrono::Duration;

/// Human wording for a link lifetime, e.g. "5 minutes" or "1 hour".
pub fn describe_lifetime(ttl: Duration) -> String {
    let minutes = ttl.num_minutes().max(1);
    let (value, unit) = if minutes % (24 * 60) == 0 {
        (minutes / (24 * 60), "day")
    } else if minutes % 60 == 0 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

pub fn render_password_reset(name: &str, reset_url: &str, lifetime: &str) -> String {
    let name = escape(name);
    let reset_url = escape(reset_url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Password Reset</h2>
    <p>Hi {name},</p>
    <p>A password reset was requested for your job board account.</p>
    <p><a href="{reset_url}" style="display: inline-block; padding: 10px 20px; background: #0070f3; color: white; text-decoration: none; border-radius: 4px;">Reset Password</a></p>
    <p style="color: #666; font-size: 14px;">This link is valid for {lifetime} and can be used once. If you didn't request this, you can ignore it.</p>
</body>
</html>"#
    )
}

pub fn render_password_changed(name: &str) -> String {
    let name = escape(name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Your password was changed</h2>
    <p>Hi {name},</p>
    <p>The password for your job board account was just reset.</p>
    <p style="color: #666; font-size: 14px;">If this wasn't you, request a new reset link right away and contact support.</p>
</body>
</html>"#
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
