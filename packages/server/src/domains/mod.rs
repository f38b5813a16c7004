// Business domains
pub mod auth;
pub mod otp;
pub mod sessions;
