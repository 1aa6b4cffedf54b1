pub mod fip;
pub mod port;
pub mod vpc;
