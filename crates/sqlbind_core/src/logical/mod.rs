pub mod column;
pub mod explain;
pub mod scan;
