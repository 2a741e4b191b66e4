pub mod users;
pub mod vms;
