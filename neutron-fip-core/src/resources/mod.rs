pub mod annotations;
pub mod condition;
pub mod crd;
