pub mod adapter;
pub mod backend;
pub mod extras;
pub mod external;
pub mod potential;
pub mod state;
