pub mod compare;
pub mod replicate;
