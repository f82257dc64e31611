// Domain layer - Picture classification and GOP line rules

pub mod errors;
pub mod model;
pub mod rules;
