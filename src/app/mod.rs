pub mod devices;
pub mod dispatch;
pub mod fcm;
pub mod payload;
