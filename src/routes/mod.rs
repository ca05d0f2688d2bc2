pub mod certificates;
pub mod donations;
pub mod stats;
