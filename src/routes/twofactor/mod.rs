mod attempts;
mod handler;
mod model;
pub mod otp;

pub use handler::{
    backup_codes,
    change_method,
    disable,
    qr_code,
    regenerate_backup_codes,
    request_setup_email_code,
    request_verify_email_code,
    security_settings,
    setup,
    setup_email,
    setup_totp,
    verify,
    verify_page,
};
pub use model::{EmailOtp, TwoFactorMethod, TwoFactorSettings};
