pub mod allocation;
pub mod helpers;
pub mod ip;
pub mod kubernetes;
pub mod resources;
pub mod topology;

pub const CONTROLLER_FIELD_MANAGER: &str = "neutron-fip-controller";
