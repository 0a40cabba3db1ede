mod equal;
mod interface;
mod rows;
mod weighted;
pub use equal::*;
pub use interface::*;
pub use rows::*;
pub use weighted::*;

#[cfg(test)]
mod tests;
