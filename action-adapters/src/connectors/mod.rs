pub mod google;
pub mod linkedin;
pub mod microsoft;
pub mod twitter;
