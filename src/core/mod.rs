pub mod domain;
pub mod template;
pub mod units;
