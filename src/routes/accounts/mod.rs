mod handler;
mod model;

pub use handler::{
    activate,
    email_change,
    login,
    logout,
    password_change,
    password_reset,
    password_reset_check,
    password_reset_confirm,
    profile,
    profile_edit,
    profile_images,
    signup,
    verify_email_change,
};
pub use model::{Profile, User};
