use rust_decimal::Decimal;

use crate::config::Config;
use crate::routes::staking::model::AssetType;

#[derive(Debug, Clone)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

fn greeting(name: &str) -> String {
    if name.trim().is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {},", name.trim())
    }
}

pub fn activation(config: &Config, name: &str, uid: &str, token: &str) -> Notice {
    Notice {
        subject: "Activate your account".into(),
        body: format!(
            "{}\n\nThanks for signing up to {}. Confirm your email address by opening:\n\n{}/accounts/activate/{}/{}\n",
            greeting(name),
            config.site_name,
            config.site_url,
            uid,
            token
        ),
    }
}

pub fn welcome(config: &Config, name: &str) -> Notice {
    Notice {
        subject: "Welcome to Our Platform!".into(),
        body: format!(
            "{}\n\nYour email address is verified and your {} account is ready.\n\n{}/accounts/login\n",
            greeting(name),
            config.site_name,
            config.site_url
        ),
    }
}

pub fn password_reset(config: &Config, name: &str, uid: &str, token: &str) -> Notice {
    Notice {
        subject: "Reset your password".into(),
        body: format!(
            "{}\n\nSomeone asked to reset the password for your account. If it was you, open:\n\n{}/accounts/password-reset-confirm/{}/{}\n\nOtherwise you can ignore this email.\n",
            greeting(name),
            config.site_url,
            uid,
            token
        ),
    }
}

pub fn email_change(config: &Config, name: &str, uid: &str, token: &str) -> Notice {
    Notice {
        subject: "Verify your new email address".into(),
        body: format!(
            "{}\n\nConfirm this address for your {} account by opening:\n\n{}/accounts/verify-email-change/{}/{}\n\nYour email stays unchanged until the link is opened.\n",
            greeting(name),
            config.site_name,
            config.site_url,
            uid,
            token
        ),
    }
}

pub fn password_changed(config: &Config, name: &str, ip_address: &str) -> Notice {
    Notice {
        subject: "Your password has been changed".into(),
        body: format!(
            "{}\n\nThe password for your {} account was changed from IP address {}.\nIf this wasn't you, reset your password immediately: {}/accounts/password-reset\n",
            greeting(name),
            config.site_name,
            ip_address,
            config.site_url
        ),
    }
}

pub fn login_alert(config: &Config, name: &str, ip_address: &str, user_agent: &str) -> Notice {
    let (device, browser) = describe_user_agent(user_agent);
    Notice {
        subject: "New login to your account".into(),
        body: format!(
            "{}\n\nWe noticed a new login to your {} account.\n\nIP address: {}\nDevice: {}\nBrowser: {}\nLocation: Unknown\n",
            greeting(name),
            config.site_name,
            ip_address,
            device,
            browser
        ),
    }
}

pub fn otp_code(config: &Config, code: &str) -> Notice {
    Notice {
        subject: "Your verification code".into(),
        body: format!(
            "Your {} verification code is: {}\n\nIt expires in {} minutes.\n",
            config.site_name, code, config.email_otp_expiry_minutes
        ),
    }
}

pub fn deposit_request(user_email: &str, amount: Decimal, asset: AssetType, tx_hash: &str) -> Notice {
    Notice {
        subject: format!("New Deposit Request: {}", user_email),
        body: format!(
            "User {} has requested a deposit of {} {}.\n\nTransaction Hash: {}\n",
            user_email, amount, asset, tx_hash
        ),
    }
}

pub fn withdrawal_request(
    user_email: &str,
    amount: Decimal,
    asset: AssetType,
    destination: &str,
) -> Notice {
    Notice {
        subject: format!("New Withdrawal Request: {}", user_email),
        body: format!(
            "User {} has requested a withdrawal of {} {}.\n\nDestination Address: {}\n",
            user_email, amount, asset, destination
        ),
    }
}

/// Coarse device and browser family from a User-Agent header.
pub fn describe_user_agent(ua: &str) -> (&'static str, &'static str) {
    let device = if ua.contains("Mobile") {
        "Mobile"
    } else if ua.contains("Tablet") {
        "Tablet"
    } else {
        "Desktop"
    };

    // order matters: Chrome UAs also mention Safari, Edge UAs mention Chrome
    let browser = if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Edg") {
        "Edge"
    } else if ua.contains("Chrome") {
        "Chrome"
    } else if ua.contains("Safari") {
        "Safari"
    } else if ua.contains("MSIE") || ua.contains("Trident") {
        "Internet Explorer"
    } else {
        "Unknown"
    };

    (device, browser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_config;

    #[test]
    fn user_agent_families() {
        let chrome = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
        assert_eq!(describe_user_agent(chrome), ("Desktop", "Chrome"));

        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
        assert_eq!(describe_user_agent(iphone), ("Mobile", "Safari"));

        let edge = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0";
        assert_eq!(describe_user_agent(edge).1, "Edge");

        assert_eq!(describe_user_agent(""), ("Desktop", "Unknown"));
    }

    #[test]
    fn activation_link_points_at_activate_route() {
        let config = test_config();
        let notice = activation(&config, "Ada", "dWlk", "tok");
        assert!(notice.body.contains("http://localhost:3000/accounts/activate/dWlk/tok"));
        assert!(notice.body.starts_with("Hello Ada,"));
    }
}
