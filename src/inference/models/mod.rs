pub mod distilbert;
pub mod model;
