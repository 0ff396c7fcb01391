pub mod email;
pub mod inapp;
pub mod sms;
