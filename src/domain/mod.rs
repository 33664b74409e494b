pub mod device;
pub mod notification;
