mod chain;
mod link;
mod running;
pub use chain::*;
pub use link::*;
pub use running::*;

#[cfg(test)]
mod tests;
