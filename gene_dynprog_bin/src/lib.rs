pub mod decoder;
pub mod model;
