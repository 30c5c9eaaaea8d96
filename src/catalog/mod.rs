pub mod assembler;
pub mod classifier;
pub mod descriptor;
pub mod format;
pub mod rows;
pub mod validate;
